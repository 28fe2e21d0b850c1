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

//! Server page evaluation. The interpreter itself is an external
//! collaborator: the embedder injects a `ScriptEngine` the same way
//! hooks are injected into the server. The engine pulls preprocessed
//! source windows from a `PageReader` and drives the `Host` surface;
//! nothing engine specific leaks into the rest of the server.

pub mod host;
pub mod reader;

use std::{fmt, fs, io};

use tracing::error;

pub use host::{Host, HostConfig, HostContext, ServerEnv};
pub use reader::{PageReader, PageSource};

use crate::{
    config::Settings,
    http::{reply, request::Request, sendbuf::SendBuf, HttpVersion},
    resources,
    session::SessionStore,
};

/// A script evaluation failure. Load errors come from the engine's
/// parser, eval errors from running the page.
#[derive(Debug)]
pub enum ScriptError {
    Load(String),
    Eval(String),
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptError::Load(msg) => write!(f, "script load error: {msg}"),
            ScriptError::Eval(msg) => write!(f, "script eval error: {msg}"),
        }
    }
}

impl std::error::Error for ScriptError {}

/// An embedded script interpreter. `eval` pulls the preprocessed page
/// source from `source` and produces output through `host`.
pub trait ScriptEngine: Send + Sync {
    fn eval(&self, source: &mut PageReader<'_>, host: &mut dyn Host) -> Result<(), ScriptError>;
}

pub struct PageRequest<'c> {
    pub request: &'c Request,
    pub settings: &'c Settings,
    pub sessions: &'c SessionStore,
    pub remote_addr: &'c str,
    pub remote_port: u16,
}

/// Serve a server page: locate the page source (embedded resources
/// first, then the www root), preprocess it and hand it to the
/// engine. Script errors are written into the open response when
/// `error_output_socket` is on, and always logged; they never take
/// down the worker.
pub fn process(
    engine: &dyn ScriptEngine,
    page: &PageRequest<'_>,
    sb: &mut SendBuf<'_>,
) -> io::Result<()> {
    let req = page.request;
    let settings = page.settings;

    let mut blob: Option<&[u8]> = None;
    if !settings.disable_embedded_res {
        if let Some(res) = resources::find(&req.filename) {
            blob = Some(res.data);
        }
    }

    let mut file = None;
    if blob.is_none() {
        if let Some(root) = &settings.wwwroot {
            let path = match crate::server::resolve_www_path(root, &req.filename) {
                Some(path) => path,
                None => {
                    return reply::send_error_page(sb, Some(&req.filename), 403, req.version);
                }
            };
            match fs::metadata(&path) {
                Ok(meta) if meta.is_file() => match fs::File::open(&path) {
                    Ok(f) => file = Some(f),
                    Err(_) => {
                        return reply::send_error_page(sb, Some(&req.filename), 403, req.version);
                    }
                },
                Ok(_) => {
                    // exists but is not a regular readable file
                    return reply::send_error_page(sb, Some(&req.filename), 403, req.version);
                }
                Err(_) => {}
            }
        }
    }

    let source = match (blob, file) {
        (Some(blob), _) => PageSource::blob(blob),
        (None, Some(f)) => PageSource::file(f),
        (None, None) => {
            return reply::send_error_page(sb, Some(&req.filename), 404, req.version);
        }
    };

    // the page length is unknown up front, so 1.1 replies are chunked
    if req.version == HttpVersion::V1_1 {
        sb.set_chunked(true);
    }

    let mut reader = PageReader::new(source);
    let mut host = HostContext::new(
        sb,
        HostConfig {
            request: req,
            sessions: page.sessions,
            remote_addr: page.remote_addr,
            remote_port: page.remote_port,
            server_port: settings.port,
            www_root: settings.wwwroot.as_deref().unwrap_or(""),
            deflate_setting: settings.deflate,
            embedded_resources_enabled: !settings.disable_embedded_res,
            session_timeout: settings.scripting.session_timeout,
        },
    );

    if let Err(err) = engine.eval(&mut reader, &mut host) {
        error!("{}:{}: {}", req.filename, reader.line(), err);
        host.flush_headers()?;
        if settings.scripting.error_output_socket {
            let msg = err.to_string();
            host.echo(msg.as_bytes())?;
        }
        return Ok(());
    }

    // a page without any output still needs its header block
    host.flush_headers()
}
