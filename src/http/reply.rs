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

//! Response emission: status line and header block framing, the
//! standard error page, and the streamed deflate pipeline for
//! compressible static content.

use std::io::{self, Read};

use flate2::{Compress, Compression, FlushCompress, Status};
use tracing::error;

use crate::{
    consts,
    http::{sendbuf::SendBuf, time, HttpVersion},
    kvlist::KvList,
};

/// Canonical reason phrases for the status codes this server emits.
/// Unknown codes get an empty reason.
pub fn status_message(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        411 => "Length Required",
        413 => "Request Entity Too Large",
        414 => "Request-URI Too Long",
        500 => "Internal Server Error",
        505 => "HTTP Version Not Supported",
        _ => "",
    }
}

/// Emit the status line and header block. A `Date` header always comes
/// first, then the caller headers in list order. Since persistent
/// connections are not supported, HTTP/1.1 replies always carry
/// `Connection: close`. When the send buffer is in chunked mode a
/// `Transfer-Encoding: chunked` header is appended and the whole block
/// is pushed to the socket right away so the body chunks that follow
/// are framed correctly.
pub fn send_header(
    sb: &mut SendBuf,
    status: u16,
    headers: &KvList,
    version: HttpVersion,
) -> io::Result<()> {
    sb.write_str(version.as_str())?;
    sb.write_str(&format!(" {} {}", status, status_message(status)))?;

    sb.write_str("\r\nDate: ")?;
    sb.write_str(&time::now())?;

    for it in headers {
        sb.write_str("\r\n")?;
        sb.write_str(&it.key)?;
        sb.write_str(": ")?;
        if let Some(v) = &it.value {
            sb.write_str(v)?;
        }
    }

    if version == HttpVersion::V1_1 {
        sb.write_str("\r\nConnection: close")?;
    }

    if sb.is_chunked() {
        sb.write_str("\r\nTransfer-Encoding: chunked\r\n\r\n")?;
        return sb.flush_raw();
    }
    sb.write_str("\r\n\r\n")
}

/// Emit a header block with just a content type.
pub fn send_simple_header(
    sb: &mut SendBuf,
    status: u16,
    content_type: &str,
    version: HttpVersion,
) -> io::Result<()> {
    let mut headers = KvList::new();
    headers.push_back("Content-Type", Some(String::from(content_type)));
    send_header(sb, status, &headers, version)
}

/// Emit a minimal error page for the given status.
pub fn send_error_page(
    sb: &mut SendBuf,
    filename: Option<&str>,
    status: u16,
    version: HttpVersion,
) -> io::Result<()> {
    let msg = status_message(status);
    send_simple_header(sb, status, "text/html", version)?;
    sb.write_str(&format!("<html><head><title>{status} {msg}</title></head>"))?;
    sb.write_str(&format!("<body><h1>{status} {msg}</h1>"))?;
    if let Some(filename) = filename {
        sb.write_str("<p>Requested file: <b>")?;
        sb.write_str(filename)?;
        sb.write_str("</b><p>")?;
    }
    sb.write_str("<hr><address>bramble</address></body></html>")
}

/// Feed a content stream through a raw deflate stream (no zlib
/// wrapper, browsers choke on it) into the send buffer, flushing
/// whenever the compressor hands back output or the stream ends. The
/// caller has already emitted the header block.
pub fn deflate_stream(sb: &mut SendBuf, src: &mut dyn Read, level: u32) -> io::Result<()> {
    let mut deflate = Compress::new(Compression::new(level), false);
    let mut inbuf = [0u8; consts::DEFLATE_BUFSIZE];
    let mut outbuf = vec![0u8; consts::SENDBUF_SIZE];
    let mut filled = 0usize;
    let mut consumed = 0usize;
    let mut eof = false;

    loop {
        if consumed == filled && !eof {
            filled = 0;
            consumed = 0;
            // read until the input window is full or the source ends
            while filled < inbuf.len() {
                let n = src.read(&mut inbuf[filled..])?;
                if n == 0 {
                    eof = true;
                    break;
                }
                filled += n;
            }
        }

        let flush = if eof && consumed == filled {
            FlushCompress::Finish
        } else {
            FlushCompress::None
        };
        let before_in = deflate.total_in();
        let before_out = deflate.total_out();
        let status = deflate
            .compress(&inbuf[consumed..filled], &mut outbuf, flush)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        consumed += (deflate.total_in() - before_in) as usize;
        let produced = (deflate.total_out() - before_out) as usize;

        if produced > 0 {
            sb.write_bytes(&outbuf[..produced])?;
            sb.flush()?;
        }

        match status {
            Status::StreamEnd => break,
            Status::Ok => {}
            Status::BufError => {
                error!("deflate stream reported a buffer error");
                return Err(io::Error::new(io::ErrorKind::Other, "deflate buffer error"));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn emitted(status: u16, headers: &KvList, version: HttpVersion, chunked: bool) -> String {
        let mut sink: Vec<u8> = vec![];
        let mut sb = SendBuf::new(&mut sink, consts::SENDBUF_SIZE);
        sb.set_chunked(chunked);
        send_header(&mut sb, status, headers, version).expect("send header");
        sb.flush_raw().expect("flush");
        String::from_utf8(sink).expect("ascii headers")
    }

    #[test]
    fn status_messages() {
        let cases = vec![
            (200, "OK"),
            (404, "Not Found"),
            (405, "Method Not Allowed"),
            (414, "Request-URI Too Long"),
            (505, "HTTP Version Not Supported"),
            (599, ""),
        ];
        for (code, want) in cases {
            assert_eq!(status_message(code), want, "code: {code}");
        }
    }

    #[test]
    fn header_block_reads_back() {
        let mut headers = KvList::new();
        headers.push_back("Content-Type", Some(String::from("text/plain")));
        headers.push_back("Content-Length", Some(String::from("2")));

        let out = emitted(200, &headers, HttpVersion::V1_1, false);
        let mut lines = out.split("\r\n");
        assert_eq!(lines.next(), Some("HTTP/1.1 200 OK"));
        assert!(lines.next().expect("date line").starts_with("Date: "));
        assert_eq!(lines.next(), Some("Content-Type: text/plain"));
        assert_eq!(lines.next(), Some("Content-Length: 2"));
        assert_eq!(lines.next(), Some("Connection: close"));
        assert_eq!(lines.next(), Some(""));
        assert_eq!(lines.next(), Some(""));
    }

    #[test]
    fn http_1_0_has_no_connection_close() {
        let out = emitted(200, &KvList::new(), HttpVersion::V1_0, false);
        assert!(out.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(!out.contains("Connection: close"));
    }

    #[test]
    fn chunked_header_announces_transfer_encoding() {
        let out = emitted(200, &KvList::new(), HttpVersion::V1_1, true);
        assert!(out.contains("Transfer-Encoding: chunked\r\n\r\n"));
    }

    #[test]
    fn error_page_contains_status_and_filename() {
        let mut sink: Vec<u8> = vec![];
        let mut sb = SendBuf::new(&mut sink, consts::SENDBUF_SIZE);
        send_error_page(&mut sb, Some("missing.html"), 404, HttpVersion::V1_0)
            .expect("send error page");
        sb.flush_last().expect("flush");
        let out = String::from_utf8(sink).expect("ascii page");
        assert!(out.starts_with("HTTP/1.0 404 Not Found\r\n"));
        assert!(out.contains("<h1>404 Not Found</h1>"));
        assert!(out.contains("missing.html"));
        assert!(out.contains("<address>bramble</address>"));
    }

    #[test]
    fn deflate_round_trips() {
        let body: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();
        let mut sink: Vec<u8> = vec![];
        let mut sb = SendBuf::new(&mut sink, consts::SENDBUF_SIZE);
        deflate_stream(&mut sb, &mut Cursor::new(body.clone()), 6).expect("deflate");
        sb.flush_last().expect("flush");

        let mut inflated = vec![];
        // raw deflate stream, no zlib header
        flate2::read::DeflateDecoder::new(Cursor::new(sink))
            .read_to_end(&mut inflated)
            .expect("inflate");
        assert_eq!(inflated, body);
    }
}
