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

//! One worker per accepted connection: read the request, route it to
//! a server command, a server page, an embedded resource or a static
//! file, emit the reply, close.

use std::{
    fs,
    io::Read,
    net::{self, SocketAddr, TcpStream},
    path::PathBuf,
    sync::Arc,
};

use anyhow::Context;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    consts,
    http::{
        reply,
        request::{self, Request},
        sendbuf::SendBuf,
        HttpVersion, Method, ScriptType,
    },
    kvlist::KvList,
    resources::{self, Resource},
    scripting::{self, PageRequest},
    server::{commands::CommandArgs, resolve_www_path, Shared},
};

pub(crate) fn run(shared: Arc<Shared>, stream: TcpStream, peer: SocketAddr, hit: u64) {
    shared.registry.register();
    if let Err(err) = handle_conn(&shared, &stream, peer, hit) {
        error!("handling connection (hit {}): {:?}", hit, err);
    }
    let _ = stream.shutdown(net::Shutdown::Both);
    shared.registry.unregister();
}

#[instrument(skip_all, fields(hit = hit))]
fn handle_conn(
    shared: &Shared,
    stream: &TcpStream,
    peer: SocketAddr,
    hit: u64,
) -> anyhow::Result<()> {
    stream
        .set_read_timeout(Some(consts::RECV_TIMEOUT))
        .context("setting read timeout on connection")?;

    let scripting_active = shared.engine.is_some() && shared.settings.scripting.enabled;
    let mut reader = stream;
    let (req, parse_result) =
        request::read_request(&mut reader, request::ReadFlags::all(), scripting_active);

    let mut writer = stream;
    let mut sb = SendBuf::new(&mut writer, consts::SENDBUF_SIZE);

    if let Err(err) = parse_result {
        // get the rest of the body out of the way so the error reply
        // arrives cleanly before the close
        if let Some(pd) = &req.post {
            if pd.content_length > 0 {
                request::drain_body(&mut reader, pd);
            } else {
                let _ = stream.set_read_timeout(Some(consts::DRAIN_TIMEOUT));
                request::drain_until_end(&mut reader);
            }
        }

        warn!("reading request from {}: {}", peer, err);
        if let Some(status) = err.http_status() {
            let filename = if req.filename.is_empty() { None } else { Some(req.filename.as_str()) };
            reply::send_error_page(&mut sb, filename, status, req.version)
                .context("sending error page")?;
            sb.flush_last().context("flushing error page")?;
        }
        return Ok(());
    }

    debug!("{} {} from {}", req.method.as_str(), req.filename, peer);

    match req.method {
        Method::Get | Method::Post => {}
        other => {
            info!("method {} not allowed", other.as_str());
            let mut headers = KvList::new();
            headers.push_back("Content-Length", Some(String::from("0")));
            reply::send_header(&mut sb, 405, &headers, req.version)
                .context("sending 405 header")?;
            sb.flush_last().context("flushing 405")?;
            return Ok(());
        }
    }

    if let Some(command) = shared.commands.find(&req.filename) {
        let args = CommandArgs {
            request: &req,
            settings: &shared.settings,
            hit,
            worker_count: shared.registry.count(),
            session_count: shared.sessions.live_count(),
        };
        command.run(&args, &mut sb).context("running server command")?;
    } else if scripting_active && req.script == ScriptType::ServerPage {
        let engine = shared.engine.as_deref().expect("engine present when scripting is active");
        let remote_addr = peer.ip().to_string();
        let page = PageRequest {
            request: &req,
            settings: &shared.settings,
            sessions: &shared.sessions,
            remote_addr: &remote_addr,
            remote_port: peer.port(),
        };
        scripting::process(engine, &page, &mut sb).context("serving server page")?;
    } else {
        serve_static(shared, &req, &mut sb).context("serving static content")?;
    }

    sb.flush_last().context("flushing response")?;
    Ok(())
}

fn serve_static(shared: &Shared, req: &Request, sb: &mut SendBuf<'_>) -> anyhow::Result<()> {
    if !shared.settings.disable_embedded_res {
        if let Some(res) = resources::find(&req.filename) {
            return serve_resource(req, res, sb);
        }
    }

    if let Some(root) = &shared.settings.wwwroot {
        let path = match resolve_www_path(root, &req.filename) {
            Some(path) => path,
            None => {
                // a path that climbs out of the www root is never
                // served
                reply::send_error_page(sb, Some(&req.filename), 403, req.version)?;
                return Ok(());
            }
        };
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => {
                return serve_file(shared, req, sb, path, meta.len());
            }
            Ok(_) => {
                reply::send_error_page(sb, Some(&req.filename), 403, req.version)?;
                return Ok(());
            }
            Err(_) => {}
        }
    }

    reply::send_error_page(sb, Some(&req.filename), 404, req.version)?;
    Ok(())
}

fn serve_resource(req: &Request, res: &Resource, sb: &mut SendBuf<'_>) -> anyhow::Result<()> {
    let mut headers = KvList::new();
    headers.push_back("Content-Type", Some(String::from(req.mimetype)));
    headers.push_front("Content-Length", Some(res.data.len().to_string()));
    headers
        .push_front("Cache-Control", Some(format!("max-age={}", consts::EMBEDDED_RES_CACHE_AGE)));
    reply::send_header(sb, 200, &headers, req.version)?;
    sb.write_bytes(res.data)?;
    Ok(())
}

fn serve_file(
    shared: &Shared,
    req: &Request,
    sb: &mut SendBuf<'_>,
    path: PathBuf,
    size: u64,
) -> anyhow::Result<()> {
    let mut file = match fs::File::open(&path) {
        Ok(f) => f,
        Err(_) => {
            reply::send_error_page(sb, Some(&req.filename), 403, req.version)?;
            return Ok(());
        }
    };

    let mut headers = KvList::new();
    headers.push_back("Content-Type", Some(String::from(req.mimetype)));

    let client_accepts_deflate = req
        .headers
        .get_ignore_case("Accept-Encoding")
        .map(|ae| ae.contains("deflate"))
        .unwrap_or(false);

    if shared.settings.deflate > 0 && req.compressible && client_accepts_deflate {
        headers.push_front("Content-Encoding", Some(String::from("deflate")));
        headers.push_front("Cache-Control", Some(format!("max-age={}", consts::STATIC_CACHE_AGE)));
        // the compressed size is unknown up front, so 1.1 replies are
        // chunked
        if req.version == HttpVersion::V1_1 {
            sb.set_chunked(true);
        }
        reply::send_header(sb, 200, &headers, req.version)?;
        reply::deflate_stream(sb, &mut file, shared.settings.deflate)
            .context("compressing file")?;
        return Ok(());
    }

    headers.push_front("Content-Length", Some(size.to_string()));
    headers.push_front("Cache-Control", Some(format!("max-age={}", consts::STATIC_CACHE_AGE)));
    reply::send_header(sb, 200, &headers, req.version)?;

    let mut buf = vec![0u8; consts::SENDBUF_SIZE];
    loop {
        let n = file.read(&mut buf).context("reading file")?;
        if n == 0 {
            break;
        }
        sb.write_bytes(&buf[..n])?;
    }
    Ok(())
}
