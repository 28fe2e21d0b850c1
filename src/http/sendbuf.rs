// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The per-response send buffer. A response is assembled into a fixed
//! size buffer and flushed to the socket either as raw bytes or, when
//! the buffer is switched into chunked mode, as http chunks of the form
//! `<hexlen>\r\n<bytes>\r\n` with a terminal `0\r\n\r\n`.

use std::io::{self, Write};

pub struct SendBuf<'a> {
    w: &'a mut dyn Write,
    buf: Vec<u8>,
    cap: usize,
    chunked: bool,
}

impl<'a> SendBuf<'a> {
    pub fn new(w: &'a mut dyn Write, cap: usize) -> Self {
        SendBuf { w, buf: Vec::with_capacity(cap), cap, chunked: false }
    }

    /// Switch chunk framing on or off. Only meaningful before the
    /// first flush of body data.
    pub fn set_chunked(&mut self, chunked: bool) {
        self.chunked = chunked;
    }

    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    /// Copy bytes into the buffer, flushing as often as needed for
    /// long inputs. Each intermediate flush emits one full chunk in
    /// chunked mode.
    pub fn write_bytes(&mut self, mut data: &[u8]) -> io::Result<()> {
        let mut avail = self.cap - self.buf.len();
        while data.len() > avail {
            self.buf.extend_from_slice(&data[..avail]);
            data = &data[avail..];
            self.flush()?;
            avail = self.cap;
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    pub fn write_str(&mut self, s: &str) -> io::Result<()> {
        self.write_bytes(s.as_bytes())
    }

    pub fn write_byte(&mut self, b: u8) -> io::Result<()> {
        if self.buf.len() >= self.cap {
            self.flush()?;
        }
        self.buf.push(b);
        Ok(())
    }

    /// Copy a string into the buffer escaping it for use inside a json
    /// string literal: `"` becomes `\"` and a linefeed becomes `\n`.
    pub fn write_json_ascii(&mut self, s: &str) -> io::Result<()> {
        for &b in s.as_bytes() {
            match b {
                b'"' => self.write_bytes(b"\\\"")?,
                b'\n' => self.write_bytes(b"\\n")?,
                _ => self.write_byte(b)?,
            }
        }
        Ok(())
    }

    /// Send the buffer contents as raw bytes regardless of the chunked
    /// flag. Used for header blocks which precede the chunked body.
    pub fn flush_raw(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            self.w.write_all(&self.buf)?;
            self.buf.clear();
        }
        Ok(())
    }

    /// Send the buffer contents, framed as one chunk when in chunked
    /// mode. An empty buffer sends nothing.
    pub fn flush(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        if self.chunked {
            write!(self.w, "{:X}\r\n", self.buf.len())?;
            self.w.write_all(&self.buf)?;
            self.w.write_all(b"\r\n")?;
            self.buf.clear();
            return Ok(());
        }
        self.flush_raw()
    }

    /// Final flush for a response. In chunked mode this additionally
    /// emits the zero length terminator chunk.
    pub fn flush_last(&mut self) -> io::Result<()> {
        self.flush()?;
        if self.chunked {
            self.w.write_all(b"0\r\n\r\n")?;
        }
        Ok(())
    }
}
