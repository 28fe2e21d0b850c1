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

//! The server page preprocessor. Transforms `<? .. ?>`, `<?= .. ?>`
//! and `<?# .. ?>` tagged text into script source the interpreter can
//! load, without ever holding the whole page in memory: the
//! interpreter pulls output windows of up to 1024 bytes, the machine
//! keeps its state across pulls.
//!
//! Text outside tags is wrapped in `echo('..')` calls with the
//! contained bytes escaped; `<?= expr ?>` becomes `echo( expr )`;
//! statement blocks pass through verbatim; comments are dropped. The
//! CR/LF directly following a closing `?>` is consumed (the way php
//! does it) so that template line numbers line up with the line
//! numbers the interpreter reports in error messages.

use std::{
    fs::File,
    io::{self, BufReader, Read},
};

use crate::consts;

/// Where the machine is between two input bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Outside of any tag, no echo call open.
    Char1,
    /// Inside an open `echo('` literal run.
    Char2,
    /// Saw `<` while inside an echo literal.
    Char3,
    /// Saw `<` with no echo call open.
    Char4,
    /// Inside `<? .. ?>`, directly after the opening tag.
    Stmt1,
    /// Inside `<?= .. ?>`.
    Stmt2,
    /// Saw `?` inside `<?= .. ?>`.
    Stmt3,
    /// Inside `<? .. ?>` statement body.
    Stmt12,
    /// Saw `?` inside a statement body.
    Stmt13,
    /// Inside `<?# .. ?>`.
    Comment1,
    /// Saw `?` inside a comment.
    Comment2,
    /// Eating the CR/LF after a closing `?>`.
    Lf1,
    /// Saw CR after a closing `?>`, expecting LF.
    Lf2,
    /// Input exhausted.
    Done,
}

/// One input byte source with pushback. The file and in-memory
/// variants share the state machine; pushback is what lets the
/// machine elide trailing whitespace after `?>` and change its mind.
pub enum PageSource<'a> {
    File { f: BufReader<File>, pushback: Vec<u8> },
    Blob { data: &'a [u8], pos: usize },
}

impl<'a> PageSource<'a> {
    pub fn file(f: File) -> Self {
        PageSource::File { f: BufReader::new(f), pushback: vec![] }
    }

    pub fn blob(data: &'a [u8]) -> Self {
        PageSource::Blob { data, pos: 0 }
    }

    fn next(&mut self) -> io::Result<Option<u8>> {
        match self {
            PageSource::File { f, pushback } => {
                if let Some(b) = pushback.pop() {
                    return Ok(Some(b));
                }
                let mut byte = [0u8; 1];
                match f.read(&mut byte)? {
                    0 => Ok(None),
                    _ => Ok(Some(byte[0])),
                }
            }
            PageSource::Blob { data, pos } => {
                if *pos < data.len() {
                    let b = data[*pos];
                    *pos += 1;
                    Ok(Some(b))
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn unget(&mut self, b: u8) {
        match self {
            PageSource::File { pushback, .. } => pushback.push(b),
            PageSource::Blob { pos, .. } => {
                // the pushed back byte is always the one just read, so
                // stepping the cursor back reproduces it
                debug_assert!(*pos > 0);
                *pos -= 1;
            }
        }
    }
}

pub struct PageReader<'a> {
    src: PageSource<'a>,
    st: State,
    line: u32,
    cur_line_echo: bool,
    buf: Vec<u8>,
}

impl<'a> PageReader<'a> {
    pub fn new(src: PageSource<'a>) -> Self {
        PageReader {
            src,
            st: State::Char1,
            line: 1,
            cur_line_echo: false,
            buf: Vec::with_capacity(consts::PAGE_BUF_LEN + 16),
        }
    }

    /// The input line the machine is currently on, for error
    /// attribution in interpreter messages.
    pub fn line(&self) -> u32 {
        self.line
    }

    fn put(&mut self, b: u8) {
        self.buf.push(b);
    }

    fn put_slice(&mut self, s: &[u8]) {
        self.buf.extend_from_slice(s);
    }

    /// Append one literal byte to an open echo call, escaped for a
    /// single quoted script string. The linefeed keeps its actual
    /// newline (preceded by a backslash) so that interpreter error
    /// messages carry the right line numbers.
    fn put_escaped(&mut self, b: u8) {
        match b {
            b'"' => self.put_slice(b"\\\""),
            b'\'' => self.put_slice(b"\\'"),
            b'\\' => self.put_slice(b"\\\\"),
            b'\n' => self.put_slice(b"\\\n"),
            0x07 => self.put_slice(b"\\a"),
            0x08 => self.put_slice(b"\\b"),
            b'\t' => self.put_slice(b"\\t"),
            0x0b => self.put_slice(b"\\v"),
            0x0c => self.put_slice(b"\\f"),
            b'\r' => self.put_slice(b"\\r"),
            0x00..=0x06 | 0x0e..=0x1f | 0x7f => self.put(b'.'),
            _ => self.put(b),
        }
    }

    fn begin_echo(&mut self) {
        self.put_slice(b"echo('");
    }

    fn end_echo(&mut self) {
        self.put_slice(b"')");
    }

    fn begin_var_echo(&mut self) {
        self.put_slice(b"echo(");
    }

    fn end_var_echo(&mut self) {
        self.put(b')');
    }

    /// Fill the next output window, up to 1024 bytes of generated
    /// script. An empty slice means the input is exhausted.
    pub fn next_window(&mut self) -> io::Result<&[u8]> {
        self.buf.clear();
        let mut whitespace_count = 0usize;

        while self.buf.len() < consts::PAGE_BUF_LEN {
            let ch = match self.src.next()? {
                Some(ch) => ch,
                None => {
                    match self.st {
                        State::Char1 | State::Lf1 | State::Lf2 | State::Done => {}
                        State::Char2 => self.end_echo(),
                        // inside an unterminated tag; emit nothing and
                        // let the interpreter report the parse error
                        // at the recorded line
                        _ => {}
                    }
                    self.st = State::Done;
                    break;
                }
            };

            match self.st {
                State::Done => break,
                State::Char1 => {
                    if ch == b'<' {
                        self.st = State::Char4;
                    } else {
                        self.begin_echo();
                        self.put_escaped(ch);
                        self.cur_line_echo = true;
                        self.st = State::Char2;
                    }
                }
                State::Char2 => {
                    if ch == b'<' {
                        self.st = State::Char3;
                    } else {
                        self.put_escaped(ch);
                        self.cur_line_echo = true;
                    }
                }
                State::Char3 => {
                    if ch == b'?' {
                        self.end_echo();
                        self.st = State::Stmt1;
                    } else {
                        self.put(b'<');
                        self.put_escaped(ch);
                        self.cur_line_echo = true;
                        self.st = State::Char2;
                    }
                }
                State::Char4 => {
                    if ch == b'?' {
                        self.st = State::Stmt1;
                    } else {
                        self.begin_echo();
                        self.put(b'<');
                        self.put_escaped(ch);
                        self.cur_line_echo = true;
                        self.st = State::Char2;
                    }
                }
                State::Stmt1 => {
                    if ch == b'=' {
                        self.begin_var_echo();
                        self.st = State::Stmt2;
                    } else if ch == b'#' {
                        self.st = State::Comment1;
                    } else {
                        self.put(ch);
                        self.st = State::Stmt12;
                    }
                }
                State::Stmt2 => {
                    if ch == b'?' {
                        self.st = State::Stmt3;
                    } else {
                        self.put(ch);
                    }
                }
                State::Stmt3 => {
                    if ch == b'>' {
                        self.end_var_echo();
                        self.st = State::Lf1;
                    } else if ch == b'?' {
                        self.put(b'?');
                    } else {
                        self.put(b'?');
                        self.put(ch);
                        self.st = State::Stmt2;
                    }
                }
                State::Stmt12 => {
                    if ch == b'?' {
                        self.st = State::Stmt13;
                    } else {
                        self.put(ch);
                    }
                }
                State::Stmt13 => {
                    if ch == b'>' {
                        self.put(b' ');
                        self.st = State::Lf1;
                    } else if ch == b'?' {
                        self.put(b'?');
                    } else {
                        self.put(b'?');
                        self.put(ch);
                        self.st = State::Stmt12;
                    }
                }
                State::Comment1 => {
                    if ch == b'?' {
                        self.st = State::Comment2;
                    }
                }
                State::Comment2 => {
                    if ch == b'>' {
                        self.st = State::Lf1;
                    } else if ch != b'?' {
                        self.st = State::Comment1;
                    }
                }
                State::Lf1 => {
                    // cut the \r and \n following a closing ?> tag the
                    // way php does
                    if ch == b'\r' {
                        self.st = State::Lf2;
                    } else if ch == b' ' {
                        whitespace_count += 1;
                    } else {
                        if ch != b'\n' {
                            self.src.unget(ch);
                            while whitespace_count > 0 {
                                self.src.unget(b' ');
                                whitespace_count -= 1;
                            }
                        } else {
                            self.put(b'\n');
                            if self.cur_line_echo {
                                self.src.unget(ch);
                            }
                            whitespace_count = 0;
                        }
                        self.st = State::Char1;
                    }
                }
                State::Lf2 => {
                    if ch != b'\n' {
                        self.src.unget(ch);
                        while whitespace_count > 0 {
                            self.src.unget(b' ');
                            whitespace_count -= 1;
                        }
                    } else {
                        self.put(b'\n');
                        if self.cur_line_echo {
                            self.src.unget(ch);
                        }
                        whitespace_count = 0;
                    }
                    self.st = State::Char1;
                }
            }

            if ch == b'\n' {
                self.cur_line_echo = false;
                self.line += 1;
            }
        }

        Ok(&self.buf)
    }

    /// Convenience for engines that want the whole generated script at
    /// once, and for tests.
    pub fn read_all(&mut self) -> io::Result<Vec<u8>> {
        let mut out = vec![];
        loop {
            let window = self.next_window()?;
            if window.is_empty() {
                break;
            }
            out.extend_from_slice(window);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn preprocess(input: &[u8]) -> String {
        let mut r = PageReader::new(PageSource::blob(input));
        String::from_utf8(r.read_all().expect("read")).expect("utf8 output")
    }

    /// A minimal stand-in for a conforming interpreter: collects the
    /// single quoted literals of the `echo('..')` calls the
    /// preprocessor emits, undoing the string escapes.
    fn collect_echo_literals(script: &str) -> String {
        let mut out = String::new();
        let mut rest = script;
        while let Some(start) = rest.find("echo('") {
            rest = &rest[start + 6..];
            let bytes = rest.as_bytes();
            let mut i = 0;
            while i < bytes.len() {
                if bytes[i] == b'\\' && i + 1 < bytes.len() {
                    match bytes[i + 1] {
                        b'\n' => out.push('\n'),
                        b'n' => out.push('\n'),
                        b't' => out.push('\t'),
                        b'r' => out.push('\r'),
                        c => out.push(c as char),
                    }
                    i += 2;
                } else if bytes[i] == b'\'' {
                    break;
                } else {
                    out.push(bytes[i] as char);
                    i += 1;
                }
            }
            rest = &rest[i..];
        }
        out
    }

    #[test]
    fn literal_text_becomes_echo() {
        assert_eq!(preprocess(b"hello"), "echo('hello')");
    }

    #[test]
    fn literal_round_trip() {
        let cases: Vec<&[u8]> = vec![
            b"hello world",
            b"two\nlines\n",
            b"quotes \"and\" 'single'",
            b"back\\slash",
            b"tab\there",
        ];
        for input in cases {
            let script = preprocess(input);
            assert_eq!(
                collect_echo_literals(&script).as_bytes(),
                input,
                "script was: {script}"
            );
        }
    }

    #[test]
    fn statement_blocks_pass_through() {
        assert_eq!(preprocess(b"<? x = 1 ?>"), " x = 1  ");
        assert_eq!(preprocess(b"a<? f() ?>b"), "echo('a') f()  echo('b')");
    }

    #[test]
    fn expression_echo_is_wrapped() {
        assert_eq!(preprocess(b"<?= x ?>"), "echo( x )");
        assert_eq!(preprocess(b"v: <?= x ?>!"), "echo('v: ')echo( x )echo('!')");
    }

    #[test]
    fn comments_are_dropped() {
        assert_eq!(preprocess(b"a<?# note ?>b"), "echo('a')echo('b')");
    }

    #[test]
    fn question_marks_inside_tags() {
        assert_eq!(preprocess(b"<? a?b ?>"), " a?b  ");
        assert_eq!(preprocess(b"<?= a??>"), "echo( a?)");
    }

    #[test]
    fn lone_angle_bracket_is_literal() {
        assert_eq!(preprocess(b"a < b"), "echo('a < b')");
        assert_eq!(preprocess(b"<x>"), "echo('<x>')");
    }

    #[test]
    fn newline_after_closing_tag_is_eaten_on_silent_lines() {
        // the line produced no echo output, so the linefeed moves into
        // the script only
        assert_eq!(preprocess(b"<? a() ?>\nrest"), " a()  \necho('rest')");
        // crlf is handled the same way
        assert_eq!(preprocess(b"<? a() ?>\r\nrest"), " a()  \necho('rest')");
    }

    #[test]
    fn newline_after_closing_tag_is_kept_for_echo_lines() {
        // the line did produce output, so the linefeed is re-injected
        // and shows up in the echoed text as well
        let script = preprocess(b"x<? a() ?>\nrest");
        assert_eq!(collect_echo_literals(&script), "x\nrest");
    }

    #[test]
    fn trailing_spaces_after_closing_tag_are_reinjected_before_other_text() {
        assert_eq!(preprocess(b"<? a() ?>  z"), " a()  echo('  z')");
    }

    #[test]
    fn line_accounting_counts_linefeeds() {
        let cases: Vec<(&[u8], u32)> = vec![
            (b"no newline", 1),
            (b"one\nnewline", 2),
            (b"three\n\n\nnewlines", 4),
        ];
        for (input, want) in cases {
            let mut r = PageReader::new(PageSource::blob(input));
            r.read_all().expect("read");
            assert_eq!(r.line(), want, "input: {:?}", input);
        }
    }

    #[test]
    fn output_is_windowed() {
        let input = vec![b'x'; 5000];
        let mut r = PageReader::new(PageSource::blob(&input));
        let first = r.next_window().expect("window").to_vec();
        assert!(!first.is_empty());
        assert!(first.len() <= consts::PAGE_BUF_LEN + 16);
        let mut rest = r.read_all().expect("read");
        let mut all = first;
        all.append(&mut rest);
        let script = String::from_utf8(all).expect("utf8");
        assert_eq!(collect_echo_literals(&script).len(), 5000);
    }

    #[test]
    fn file_and_blob_sources_agree() {
        let input = b"a<?= v ?>\n<? if x then ?>text<? end ?>\ncontrol\x01byte";
        let mut tmp = tempfile::NamedTempFile::new().expect("tmp file");
        std::io::Write::write_all(&mut tmp, input).expect("write tmp");

        let from_blob = preprocess(input);
        let f = File::open(tmp.path()).expect("open tmp");
        let mut r = PageReader::new(PageSource::file(f));
        let from_file = String::from_utf8(r.read_all().expect("read")).expect("utf8");
        assert_eq!(from_blob, from_file);
    }

    #[test]
    fn unterminated_echo_is_closed_at_eof() {
        assert_eq!(preprocess(b"abc"), "echo('abc')");
        // unterminated statement emits what it saw and stops silently
        assert_eq!(preprocess(b"<? x = 1"), " x = 1");
    }

    #[test]
    fn control_bytes_are_dotted() {
        assert_eq!(preprocess(b"a\x01b"), "echo('a.b')");
        assert_eq!(preprocess(b"bell\x07"), "echo('bell\\a')");
    }
}
