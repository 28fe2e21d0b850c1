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

//! Reads one http request off a socket: request line, headers, cookies
//! and, for POST, the body. Budgets are enforced while reading: a
//! single header line must fit 4 KiB, a single urlencoded form field
//! must fit 64 KiB.

use std::{
    io::{self, Read},
    mem,
};

use crate::{
    consts,
    http::{url, HttpVersion, Method, RequestError, ScriptType},
    kvlist::{KvIter, KvList},
};

/// Which optional parts of the request to tokenize. Headers are always
/// collected since routing and POST handling need them.
#[derive(Debug, Clone, Copy)]
pub struct ReadFlags {
    pub get_vars: bool,
    pub post_vars: bool,
    pub cookies: bool,
}

impl ReadFlags {
    pub fn all() -> Self {
        ReadFlags { get_vars: true, post_vars: true, cookies: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PostContentType {
    #[default]
    None,
    UrlEncoded,
    Multipart,
}

/// Book keeping for a POST body. `bytes_read` counts body bytes taken
/// off the socket so far (the parser may buffer some past the header
/// terminator); together with `content_length` it tells the worker how
/// much is left to drain after a failure.
#[derive(Debug, Default)]
pub struct PostData {
    pub content_length: u64,
    pub bytes_read: u64,
    pub boundary: Option<String>,
    pub content_type: PostContentType,
    pub chunked: bool,
    leftover: Vec<u8>,
}

/// One parsed http request. Immutable once `read_request` returns.
#[derive(Debug, Default)]
pub struct Request {
    pub method: Method,
    /// Decoded request path with the leading `/` stripped.
    pub filename: String,
    pub get_vars: KvList,
    pub post_vars: KvList,
    pub headers: KvList,
    pub cookies: KvList,
    pub version: HttpVersion,
    pub mimetype: &'static str,
    pub compressible: bool,
    pub script: ScriptType,
    pub post: Option<PostData>,
}

/// File extension to mime type table. Most likely extensions up front,
/// first match wins. Unknown extensions fall back to text/html without
/// the compressible flag.
struct ExtEntry {
    ext: &'static str,
    mime: &'static str,
    compressible: bool,
    script: ScriptType,
}

const fn ext(ext: &'static str, mime: &'static str, compressible: bool) -> ExtEntry {
    ExtEntry { ext, mime, compressible, script: ScriptType::None }
}

const fn ext_page(ext: &'static str, mime: &'static str) -> ExtEntry {
    ExtEntry { ext, mime, compressible: true, script: ScriptType::ServerPage }
}

const EXTENSIONS: &[ExtEntry] = &[
    ext("html", "text/html", true),
    ext("css", "text/css", true),
    ext("js", "application/x-javascript", true),
    ext("ico", "image/x-icon", false),
    ext("png", "image/png", false),
    // server pages
    ext_page("lsp", "text/x-lsp"),
    ext_page("lua", "text/x-lua"),
    // less used extensions later in the list
    ext("txt", "text/plain", true),
    ext("jpg", "image/jpeg", false),
    ext("jpeg", "image/jpeg", false),
    ext("json", "application/json", true),
    ext("gif", "image/gif", false),
    ext("zip", "application/zip", false),
    ext("tar", "application/x-tar", false),
    ext("tgz", "application/x-compressed", false),
    ext("tar.gz", "application/x-compressed", false),
    ext("gz", "application/x-gzip", false),
    ext("log", "text/plain", true),
    ext("tif", "image/tiff", false),
    ext("tiff", "image/tiff", false),
    ext("swf", "application/x-shockwave-flash", false),
    ext("htm", "text/html", true),
    ext("pdf", "application/pdf", false),
    ext("c", "text/x-c", true),
    ext("cpp", "text/x-c", true),
    // multimedia, video, audio
    ext("avi", "video/x-msvideo", false),
    ext("mpg", "video/mpeg", false),
    ext("mkv", "video/x-matroska", false),
    ext("mks", "video/x-matroska", false),
    ext("mk3d", "video/x-matroska", false),
    ext("mpeg", "video/mpeg", false),
    ext("mp3", "audio/mpeg", false),
    ext("ogg", "audio/ogg", false),
    // applications
    ext("doc", "application/msword", false),
    ext("docx", "application/vnd.openxmlformats-officedocument.wordprocessingml.document", false),
    ext("xls", "application/vnd.ms-excel", false),
];

fn infer_mimetype(filename: &str) -> (&'static str, bool, ScriptType) {
    for e in EXTENSIONS {
        if filename.len() > e.ext.len()
            && filename.as_bytes()[filename.len() - e.ext.len() - 1] == b'.'
            && filename.ends_with(e.ext)
        {
            return (e.mime, e.compressible, e.script);
        }
    }
    (EXTENSIONS[0].mime, false, ScriptType::None)
}

/// Buffered line reading for the request head. Lines are CRLF
/// terminated; a line that does not fit the buffer is the
/// header-line-size-exceeded error.
struct RecvBuf<'a> {
    conn: &'a mut dyn Read,
    buf: Vec<u8>,
    start: usize,
    end: usize,
}

impl<'a> RecvBuf<'a> {
    fn new(conn: &'a mut dyn Read) -> Self {
        RecvBuf { conn, buf: vec![0; consts::MAX_HEADER_LINE], start: 0, end: 0 }
    }

    fn next_line(&mut self) -> Result<Vec<u8>, RequestError> {
        loop {
            if let Some(i) =
                self.buf[self.start..self.end].windows(2).position(|w| w == b"\r\n")
            {
                let line = self.buf[self.start..self.start + i].to_vec();
                self.start += i + 2;
                return Ok(line);
            }
            if self.start > 0 {
                self.buf.copy_within(self.start..self.end, 0);
                self.end -= self.start;
                self.start = 0;
            }
            if self.end == self.buf.len() {
                return Err(RequestError::HeaderLineSizeExceeded);
            }
            match self.conn.read(&mut self.buf[self.end..]) {
                Ok(0) => return Err(RequestError::Malformed),
                Ok(n) => self.end += n,
                Err(e) => return Err(RequestError::from(e)),
            }
        }
    }

    /// Whatever was received past the header terminator; the beginning
    /// of the request body.
    fn leftover(self) -> Vec<u8> {
        self.buf[self.start..self.end].to_vec()
    }
}

/// Decodes an inbound chunked transfer encoded body into plain bytes.
struct ChunkedReader<R> {
    src: R,
    in_chunk: u64,
    need_crlf: bool,
    done: bool,
}

impl<R: Read> ChunkedReader<R> {
    fn new(src: R) -> Self {
        ChunkedReader { src, in_chunk: 0, need_crlf: false, done: false }
    }

    fn read_line(&mut self) -> io::Result<String> {
        let mut line = Vec::with_capacity(16);
        let mut byte = [0u8; 1];
        loop {
            if self.src.read(&mut byte)? == 0 {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "eof in chunk header"));
            }
            if byte[0] == b'\n' {
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(String::from_utf8_lossy(&line).into_owned());
            }
            if line.len() > 64 {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "oversize chunk header"));
            }
            line.push(byte[0]);
        }
    }
}

impl<R: Read> Read for ChunkedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.done {
            return Ok(0);
        }
        if self.in_chunk == 0 {
            if self.need_crlf {
                self.read_line()?;
                self.need_crlf = false;
            }
            let size_line = self.read_line()?;
            let size_tok = size_line.split(';').next().unwrap_or("").trim();
            let size = u64::from_str_radix(size_tok, 16)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad chunk size"))?;
            if size == 0 {
                // consume the (possibly empty) trailer up to the blank line
                loop {
                    if self.read_line()?.is_empty() {
                        break;
                    }
                }
                self.done = true;
                return Ok(0);
            }
            self.in_chunk = size;
            self.need_crlf = true;
        }
        let want = buf.len().min(self.in_chunk as usize);
        let n = self.src.read(&mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "eof inside chunk"));
        }
        self.in_chunk -= n as u64;
        Ok(n)
    }
}

/// Read one request. The returned `Request` is always populated as far
/// as parsing got, so that the caller can build an error page and
/// drain the body even when the result carries an error.
pub fn read_request<R: Read>(
    conn: &mut R,
    flags: ReadFlags,
    scripting: bool,
) -> (Request, Result<(), RequestError>) {
    let mut req = Request::default();
    let res = read_into(conn, flags, scripting, &mut req);
    (req, res)
}

fn read_into<R: Read>(
    conn: &mut R,
    flags: ReadFlags,
    scripting: bool,
    req: &mut Request,
) -> Result<(), RequestError> {
    let mut rb = RecvBuf::new(&mut *conn);

    // request line: "GET /index.html HTTP/1.1"
    let line = rb.next_line()?;
    let sp = line.iter().position(|&b| b == b' ').ok_or(RequestError::Malformed)?;
    req.method = Method::from_token(&String::from_utf8_lossy(&line[..sp]));

    let rest = &line[sp + 1..];
    let (uri, version_tok) = match rest.iter().position(|&b| b == b' ') {
        Some(p) => (&rest[..p], Some(&rest[p + 1..])),
        None => (rest, None),
    };
    if version_tok == Some(b"HTTP/1.1" as &[u8]) {
        req.version = HttpVersion::V1_1;
    }

    parse_url(uri, flags, scripting, req);

    // header lines until the bare CRLF terminator
    loop {
        let line = rb.next_line()?;
        if line.is_empty() {
            break;
        }
        let colon = line.iter().position(|&b| b == b':').ok_or(RequestError::Malformed)?;
        let key = String::from_utf8_lossy(&line[..colon]).into_owned();
        let mut val = &line[colon + 1..];
        if val.first() == Some(&b' ') {
            val = &val[1..];
        }
        let val = String::from_utf8_lossy(val).into_owned();

        if flags.cookies && key.eq_ignore_ascii_case("Cookie") {
            for (k, v) in KvIter::new(b';', b'=', val.as_bytes()).skip_leading(b' ') {
                if !k.is_empty() {
                    req.cookies.push_back(url::decode(k), v.map(url::decode));
                }
            }
        }
        req.headers.push_back(key, Some(val));
    }

    if req.method == Method::Post {
        // consuming the line buffer releases the connection for the
        // body reads and hands over the buffered body prefix
        let leftover = rb.leftover();
        read_post_info(conn, leftover, flags, req)?;
    }

    Ok(())
}

fn parse_url(uri: &[u8], flags: ReadFlags, scripting: bool, req: &mut Request) {
    let uri = if uri.first() == Some(&b'/') { &uri[1..] } else { uri };

    let (path, query) = match uri.iter().position(|&b| b == b'?') {
        Some(q) => (&uri[..q], Some(&uri[q + 1..])),
        None => (uri, None),
    };

    if path.is_empty() {
        req.filename =
            String::from(if scripting { "index.lsp" } else { "index.html" });
    } else {
        req.filename = url::decode(path);
    }

    if flags.get_vars {
        if let Some(query) = query {
            for (k, v) in KvIter::new(b'&', b'=', query) {
                if !k.is_empty() {
                    req.get_vars.push_back(url::decode(k), v.map(url::decode));
                }
            }
        }
    }

    let (mime, compressible, script) = infer_mimetype(&req.filename);
    req.mimetype = mime;
    req.compressible = compressible;
    req.script = script;
}

fn read_post_info<R: Read>(
    conn: &mut R,
    leftover: Vec<u8>,
    flags: ReadFlags,
    req: &mut Request,
) -> Result<(), RequestError> {
    let pd = PostData {
        bytes_read: leftover.len() as u64,
        leftover,
        ..PostData::default()
    };

    let te = req.headers.get_ignore_case("Transfer-Encoding").map(String::from);
    let ct = req.headers.get_ignore_case("Content-Type").map(String::from);
    let cl = req.headers.get_ignore_case("Content-Length").map(String::from);

    // the descriptor is attached before any of the failure exits so
    // the worker can still drain the body
    req.post = Some(pd);

    if let Some(te) = te {
        if te != "chunked" {
            // only plain chunked is supported, no stacked encodings
            // like "gzip, chunked"
            return Err(RequestError::TransferEncodingUnsupported);
        }
        req.post.as_mut().expect("post data present").chunked = true;
    }

    let pd = req.post.as_mut().expect("post data present");
    if !pd.chunked {
        match cl {
            Some(cl) => pd.content_length = parse_content_length(&cl),
            None => return Err(RequestError::MissingContentLength),
        }
    }

    match ct.as_deref() {
        Some(ct) if starts_with_ignore_case(ct, "multipart/form-data") => {
            // multipart needs the boundary; field parsing itself is
            // deferred to the route that consumes the upload
            match ct["multipart/form-data".len()..].find("boundary=") {
                Some(p) => {
                    let b = &ct["multipart/form-data".len() + p + "boundary=".len()..];
                    pd.boundary = Some(String::from(b));
                    pd.content_type = PostContentType::Multipart;
                }
                None => return Err(RequestError::Malformed),
            }
        }
        Some(ct) if ct.eq_ignore_ascii_case("application/x-www-form-urlencoded") => {
            pd.content_type = PostContentType::UrlEncoded;
        }
        Some(_) => return Err(RequestError::ContentTypeUnsupported),
        None => return Err(RequestError::Malformed),
    }

    if pd.content_type == PostContentType::UrlEncoded && flags.post_vars {
        read_post_vars_urlencoded(conn, req)?;
    }

    Ok(())
}

fn parse_content_length(s: &str) -> u64 {
    let digits: String = s.trim_start().chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// Stream-parse an urlencoded body into post variables. The buffer
/// grows in 2 KiB increments up to the 64 KiB cap; a single field that
/// still does not fit is an error. Any residual body bytes are drained
/// before returning so that a clean reply can follow.
fn read_post_vars_urlencoded<R: Read>(
    conn: &mut R,
    req: &mut Request,
) -> Result<(), RequestError> {
    let pd = req.post.as_mut().expect("post data present");
    let chunked = pd.chunked;
    let content_length = pd.content_length;
    let mut bytes_read = pd.bytes_read;
    let leftover = mem::take(&mut pd.leftover);

    let mut vars = KvList::new();
    let res = if chunked {
        let mut src = ChunkedReader::new(io::Cursor::new(leftover).chain(&mut *conn));
        parse_form_fields(&mut src, Vec::new(), false, &mut bytes_read, &mut vars)
    } else {
        let limit = content_length.saturating_sub(bytes_read);
        let mut src = (&mut *conn).take(limit);
        let eod = bytes_read >= content_length;
        parse_form_fields(&mut src, leftover, eod, &mut bytes_read, &mut vars)
    };

    let pd = req.post.as_mut().expect("post data present");
    pd.bytes_read = bytes_read;
    req.post_vars = vars;
    res
}

fn parse_form_fields<R: Read>(
    src: &mut R,
    initial: Vec<u8>,
    mut eod: bool,
    bytes_read: &mut u64,
    vars: &mut KvList,
) -> Result<(), RequestError> {
    let mut buf = initial;
    let mut pos = 0usize;

    // pulls more body bytes into buf, compacting the consumed prefix
    // first. Returns false once the field cap is reached.
    fn fill_more<R: Read>(
        src: &mut R,
        buf: &mut Vec<u8>,
        pos: &mut usize,
        eod: &mut bool,
        bytes_read: &mut u64,
    ) -> Result<bool, RequestError> {
        if *pos > 0 {
            buf.drain(..*pos);
            *pos = 0;
        }
        if buf.len() >= consts::MAX_FORM_FIELD_BYTES {
            return Ok(false);
        }
        let mut tmp = [0u8; consts::FORM_BUF_INCREMENT];
        match src.read(&mut tmp) {
            Ok(0) => *eod = true,
            Ok(n) => {
                buf.extend_from_slice(&tmp[..n]);
                *bytes_read += n as u64;
            }
            Err(e) => return Err(RequestError::from(e)),
        }
        Ok(true)
    }

    loop {
        if pos >= buf.len() && eod {
            break;
        }

        // find '=', receiving more data as needed
        let eq = loop {
            if let Some(i) = buf[pos..].iter().position(|&b| b == b'=') {
                break Some(pos + i);
            }
            if eod {
                break None;
            }
            if !fill_more(src, &mut buf, &mut pos, &mut eod, bytes_read)? {
                return Err(RequestError::FormFieldSizeExceeded);
            }
        };
        let eq = match eq {
            None if pos >= buf.len() => break,
            None => return Err(RequestError::FormFieldSizeExceeded),
            Some(eq) if eq == pos => return Err(RequestError::Malformed),
            Some(eq) => eq,
        };
        let key = url::decode(&buf[pos..eq]);
        pos = eq + 1;

        // find '&' or end of data
        let amp = loop {
            if let Some(i) = buf[pos..].iter().position(|&b| b == b'&') {
                break Some(pos + i);
            }
            if eod {
                break None;
            }
            if !fill_more(src, &mut buf, &mut pos, &mut eod, bytes_read)? {
                return Err(RequestError::FormFieldSizeExceeded);
            }
        };
        match amp {
            Some(amp) => {
                vars.push_back(key, Some(url::decode(&buf[pos..amp])));
                pos = amp + 1;
            }
            None => {
                vars.push_back(key, Some(url::decode(&buf[pos..])));
                pos = buf.len();
            }
        }
    }

    // read-until-end drains whatever the tokenizer did not consume
    let mut tmp = [0u8; consts::FORM_BUF_INCREMENT];
    loop {
        match src.read(&mut tmp) {
            Ok(0) => break,
            Ok(n) => *bytes_read += n as u64,
            Err(e) => return Err(RequestError::from(e)),
        }
    }

    Ok(())
}

/// Throw away the rest of a sized request body so the socket is clean
/// for the error reply.
pub fn drain_body<R: Read>(conn: &mut R, pd: &PostData) -> u64 {
    let mut remaining = pd.content_length.saturating_sub(pd.bytes_read);
    let mut tmp = [0u8; consts::FORM_BUF_INCREMENT];
    let mut drained = 0;
    while remaining > 0 {
        let want = tmp.len().min(remaining as usize);
        match conn.read(&mut tmp[..want]) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                remaining -= n as u64;
                drained += n as u64;
            }
        }
    }
    drained
}

/// Drain a body of unknown size until the peer stops sending or the
/// (shortened) receive timeout expires.
pub fn drain_until_end<R: Read>(conn: &mut R) {
    let mut tmp = [0u8; consts::FORM_BUF_INCREMENT];
    loop {
        match conn.read(&mut tmp) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn read(raw: &[u8]) -> (Request, Result<(), RequestError>) {
        let mut conn = io::Cursor::new(raw.to_vec());
        read_request(&mut conn, ReadFlags::all(), false)
    }

    fn kv(list: &KvList) -> Vec<(String, Option<String>)> {
        list.iter().map(|it| (it.key.clone(), it.value.clone())).collect()
    }

    #[test]
    fn get_with_query() {
        let (req, res) = read(b"GET /p?a=1&b=hello%20world HTTP/1.1\r\n\r\n");
        res.expect("parse to succeed");
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.filename, "p");
        assert_eq!(req.version, HttpVersion::V1_1);
        assert_eq!(
            kv(&req.get_vars),
            vec![
                (String::from("a"), Some(String::from("1"))),
                (String::from("b"), Some(String::from("hello world"))),
            ]
        );
    }

    #[test]
    fn missing_version_is_http_1_0() {
        let (req, res) = read(b"GET /x.html\r\n\r\n");
        res.expect("parse to succeed");
        assert_eq!(req.version, HttpVersion::V1_0);
        assert_eq!(req.mimetype, "text/html");
        assert!(req.compressible);
    }

    #[test]
    fn empty_path_uses_default_file() {
        let (req, res) = read(b"GET / HTTP/1.1\r\n\r\n");
        res.expect("parse to succeed");
        assert_eq!(req.filename, "index.html");

        let mut conn = io::Cursor::new(b"GET /?a=1 HTTP/1.1\r\n\r\n".to_vec());
        let (req, res) = read_request(&mut conn, ReadFlags::all(), true);
        res.expect("parse to succeed");
        assert_eq!(req.filename, "index.lsp");
        assert_eq!(req.script, ScriptType::ServerPage);
        assert_eq!(req.get_vars.get("a"), Some("1"));
    }

    #[test]
    fn headers_and_cookies() {
        let (req, res) = read(
            b"GET /x HTTP/1.1\r\n\
              Host: localhost\r\n\
              Cookie: WSESSID=00000000000000A112345678; theme=dark\r\n\
              X-Padded:   two spaces\r\n\r\n",
        );
        res.expect("parse to succeed");
        assert_eq!(req.headers.get("Host"), Some("localhost"));
        // only a single leading space is stripped from header values
        assert_eq!(req.headers.get("X-Padded"), Some("  two spaces"));
        assert_eq!(req.cookies.get("WSESSID"), Some("00000000000000A112345678"));
        assert_eq!(req.cookies.get("theme"), Some("dark"));
    }

    #[test]
    fn header_without_colon_is_malformed() {
        let (_, res) = read(b"GET /x HTTP/1.1\r\nBadHeader\r\n\r\n");
        assert!(matches!(res, Err(RequestError::Malformed)));
    }

    #[test]
    fn oversize_header_line() {
        let mut raw = b"GET /x HTTP/1.1\r\nX-Big: ".to_vec();
        raw.extend(std::iter::repeat(b'a').take(5 * 1024));
        let (_, res) = read(&raw);
        assert!(matches!(res, Err(RequestError::HeaderLineSizeExceeded)));
    }

    #[test]
    fn post_urlencoded() {
        let (req, res) = read(
            b"POST /x HTTP/1.1\r\n\
              Content-Type: application/x-www-form-urlencoded\r\n\
              Content-Length: 10\r\n\r\n\
              k=v&k2=v+w",
        );
        res.expect("parse to succeed");
        assert_eq!(
            kv(&req.post_vars),
            vec![
                (String::from("k"), Some(String::from("v"))),
                (String::from("k2"), Some(String::from("v w"))),
            ]
        );
        let pd = req.post.expect("post data");
        assert_eq!(pd.content_type, PostContentType::UrlEncoded);
        assert_eq!(pd.bytes_read, 10);
    }

    #[test]
    fn post_urlencoded_chunked() {
        let (req, res) = read(
            b"POST /x HTTP/1.1\r\n\
              Content-Type: application/x-www-form-urlencoded\r\n\
              Transfer-Encoding: chunked\r\n\r\n\
              6\r\nk=v&k2\r\n4\r\n=v+w\r\n0\r\n\r\n",
        );
        res.expect("parse to succeed");
        assert_eq!(
            kv(&req.post_vars),
            vec![
                (String::from("k"), Some(String::from("v"))),
                (String::from("k2"), Some(String::from("v w"))),
            ]
        );
        assert!(req.post.expect("post data").chunked);
    }

    #[test]
    fn post_without_content_length() {
        let (req, res) = read(
            b"POST /x HTTP/1.1\r\n\
              Content-Type: application/x-www-form-urlencoded\r\n\r\n",
        );
        assert!(matches!(res, Err(RequestError::MissingContentLength)));
        assert!(req.post.is_some());
    }

    #[test]
    fn post_with_unknown_transfer_encoding() {
        let (_, res) = read(
            b"POST /x HTTP/1.1\r\n\
              Transfer-Encoding: gzip, chunked\r\n\r\n",
        );
        assert!(matches!(res, Err(RequestError::TransferEncodingUnsupported)));
    }

    #[test]
    fn post_with_unknown_content_type() {
        let (_, res) = read(
            b"POST /x HTTP/1.1\r\n\
              Content-Type: text/plain\r\n\
              Content-Length: 2\r\n\r\nhi",
        );
        assert!(matches!(res, Err(RequestError::ContentTypeUnsupported)));
    }

    #[test]
    fn multipart_boundary_is_captured() {
        let (req, res) = read(
            b"POST /up HTTP/1.1\r\n\
              Content-Type: multipart/form-data; boundary=----xyz\r\n\
              Content-Length: 0\r\n\r\n",
        );
        res.expect("parse to succeed");
        let pd = req.post.expect("post data");
        assert_eq!(pd.content_type, PostContentType::Multipart);
        assert_eq!(pd.boundary.as_deref(), Some("----xyz"));
    }

    #[test]
    fn multipart_without_boundary_is_malformed() {
        let (_, res) = read(
            b"POST /up HTTP/1.1\r\n\
              Content-Type: multipart/form-data\r\n\
              Content-Length: 0\r\n\r\n",
        );
        assert!(matches!(res, Err(RequestError::Malformed)));
    }

    #[test]
    fn form_field_over_cap() {
        let mut raw = format!(
            "POST /x HTTP/1.1\r\n\
             Content-Type: application/x-www-form-urlencoded\r\n\
             Content-Length: {}\r\n\r\n",
            70 * 1024
        )
        .into_bytes();
        raw.extend(std::iter::repeat(b'a').take(70 * 1024));
        let (_, res) = read(&raw);
        assert!(matches!(res, Err(RequestError::FormFieldSizeExceeded)));
    }

    #[test]
    fn mime_inference() {
        let cases = vec![
            ("a.html", "text/html", true, ScriptType::None),
            ("a.css", "text/css", true, ScriptType::None),
            ("a.png", "image/png", false, ScriptType::None),
            ("a.lsp", "text/x-lsp", true, ScriptType::ServerPage),
            ("a.tar.gz", "application/x-compressed", false, ScriptType::None),
            ("noext", "text/html", false, ScriptType::None),
            ("a.weird", "text/html", false, ScriptType::None),
        ];
        for (name, mime, compressible, script) in cases {
            assert_eq!(infer_mimetype(name), (mime, compressible, script), "file: {name}");
        }
    }

    #[test]
    fn chunked_reader_decodes() {
        let framed = b"3\r\nabc\r\nA\r\n0123456789\r\n0\r\n\r\n";
        let mut r = ChunkedReader::new(io::Cursor::new(framed.to_vec()));
        let mut out = vec![];
        r.read_to_end(&mut out).expect("decode to succeed");
        assert_eq!(out, b"abc0123456789");
    }
}
