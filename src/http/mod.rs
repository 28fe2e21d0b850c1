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

use std::{fmt, io};

pub mod reply;
pub mod request;
pub mod sendbuf;
pub mod time;
pub mod url;

/// The request methods we recognize on the wire. Only GET and POST are
/// actually served, the rest get a 405.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Unknown,
    Get,
    Post,
    Head,
    Put,
    Delete,
    Link,
    Unlink,
}

impl Method {
    pub fn from_token(token: &str) -> Method {
        match token {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "HEAD" => Method::Head,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "LINK" => Method::Link,
            "UNLINK" => Method::Unlink,
            _ => Method::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Unknown => "UNKNOWN",
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Head => "HEAD",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Link => "LINK",
            Method::Unlink => "UNLINK",
        }
    }
}

impl Default for Method {
    fn default() -> Self {
        Method::Unknown
    }
}

/// The http version a reply should be framed with. Anything that does
/// not announce itself as exactly HTTP/1.1 is treated as HTTP/1.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpVersion {
    #[default]
    V1_0,
    V1_1,
}

impl HttpVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVersion::V1_0 => "HTTP/1.0",
            HttpVersion::V1_1 => "HTTP/1.1",
        }
    }
}

/// Server side scripting type inferred from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScriptType {
    #[default]
    None,
    ServerPage,
}

/// Everything that can go wrong while reading a request off the wire.
/// Each kind maps to a specific reply (or to no reply at all for plain
/// socket errors), see `http_status`.
#[derive(Debug)]
pub enum RequestError {
    /// OS level error on the socket. The peer is gone, close without
    /// a reply.
    Socket(io::Error),
    /// The 10 second receive timeout expired.
    Timeout,
    /// A request or header line did not fit the line buffer.
    HeaderLineSizeExceeded,
    /// A single urlencoded form field exceeded the form buffer cap.
    FormFieldSizeExceeded,
    /// POST without Content-Length and without chunked encoding.
    MissingContentLength,
    /// Anything structurally wrong with the request.
    Malformed,
    /// A Transfer-Encoding other than chunked.
    TransferEncodingUnsupported,
    /// A POST content type we do not handle.
    ContentTypeUnsupported,
}

impl RequestError {
    /// The status code to answer with, or None when the connection is
    /// not worth replying on.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            RequestError::Socket(_) => None,
            RequestError::Timeout => Some(408),
            RequestError::HeaderLineSizeExceeded => Some(414),
            RequestError::FormFieldSizeExceeded => Some(413),
            RequestError::MissingContentLength => Some(411),
            RequestError::Malformed => Some(400),
            RequestError::TransferEncodingUnsupported => Some(400),
            RequestError::ContentTypeUnsupported => Some(400),
        }
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::Socket(e) => write!(f, "socket error: {e}"),
            RequestError::Timeout => write!(f, "timeout while reading request"),
            RequestError::HeaderLineSizeExceeded => write!(f, "header line size exceeded"),
            RequestError::FormFieldSizeExceeded => write!(f, "form field size exceeded"),
            RequestError::MissingContentLength => write!(f, "missing content length"),
            RequestError::Malformed => write!(f, "malformed request"),
            RequestError::TransferEncodingUnsupported => {
                write!(f, "transfer encoding not supported")
            }
            RequestError::ContentTypeUnsupported => write!(f, "content type not supported"),
        }
    }
}

impl std::error::Error for RequestError {}

impl From<io::Error> for RequestError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => RequestError::Timeout,
            _ => RequestError::Socket(e),
        }
    }
}
