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

use std::time;

pub const SERVER_VERSION: &str = concat!("bramble ", env!("CARGO_PKG_VERSION"));

/// Size of the per-response send buffer. When the buffer is in chunked
/// mode this is also the maximum chunk payload size.
pub const SENDBUF_SIZE: usize = 8192;

/// Input window for feeding file bytes into the deflate stream.
pub const DEFLATE_BUFSIZE: usize = 2048;

/// A single request or header line must fit into this many bytes.
pub const MAX_HEADER_LINE: usize = 4096;

/// Urlencoded form parsing grows its buffer in these increments.
pub const FORM_BUF_INCREMENT: usize = 2048;

/// Hard cap for a single urlencoded form field (key or value).
pub const MAX_FORM_FIELD_BYTES: usize = 64 * 1024;

/// How long a blocking receive may wait before the worker gives up
/// and answers with 408.
pub const RECV_TIMEOUT: time::Duration = time::Duration::from_secs(10);

/// Shorter timeout used when draining the remains of a request body
/// that we are only going to throw away.
pub const DRAIN_TIMEOUT: time::Duration = time::Duration::from_secs(3);

/// Static content served from the www root can and should be cached by
/// browsers or proxies. 6 hours.
pub const STATIC_CACHE_AGE: u32 = 21600;

/// Embedded resources only change with the binary. 7 days.
pub const EMBEDDED_RES_CACHE_AGE: u32 = 604800;

pub const LISTEN_BACKLOG: i32 = 64;

pub const SERVER_PORT_MIN: u16 = 1;
pub const SERVER_PORT_MAX: u16 = 60000;

/// Name of the session cookie exchanged with browsers.
pub const SESSION_COOKIE_NAME: &str = "WSESSID";

/// A date safely in the past, used to expire cookies and to defeat
/// caching of server page output.
pub const DATE_IN_PAST: &str = "Fri, 01 Oct 1982 23:52:00 GMT";

/// Output window filled per pull by the server page preprocessor.
pub const PAGE_BUF_LEN: usize = 1024;

pub const DEFAULT_CONFIG_FILE: &str = "bramble.toml";
