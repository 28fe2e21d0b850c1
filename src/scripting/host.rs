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

//! The host surface a script engine programs against: response output,
//! header and status manipulation, and the session operations. The
//! engine only ever sees the object safe `Host` trait; the concrete
//! context lives for one page evaluation.

use std::{
    io,
    sync::{Arc, Mutex},
};

use tracing::warn;

use crate::{
    consts,
    http::{reply, request::Request, sendbuf::SendBuf},
    kvlist::KvList,
    session::{Session, SessionStore, SESSION_VARS_DATA_ID},
};

/// Server side values exposed to scripts under `env.server`.
pub struct ServerEnv<'a> {
    pub remote_addr: &'a str,
    pub remote_port: u16,
    pub server_port: u16,
    pub www_root: &'a str,
    pub script: &'a str,
    pub request_method: &'a str,
    pub server_version: &'a str,
    pub deflate_setting: u32,
    pub embedded_resources_enabled: bool,
}

/// What a script can do to the response and the session while its
/// page is being evaluated.
pub trait Host {
    /// Append bytes to the response body. The pending headers are
    /// flushed in front of the first byte of output.
    fn echo(&mut self, data: &[u8]) -> io::Result<()>;

    /// Set the pending status code (when given) and return the
    /// current one.
    fn response_code(&mut self, code: Option<u16>) -> u16;

    /// Current value of a pending header.
    fn header(&self, name: &str) -> Option<String>;

    /// Set, replace or (with None) delete a pending header. Has no
    /// effect on the wire once the headers have been flushed.
    fn set_header(&mut self, name: &str, value: Option<&str>);

    /// Resume or create the session identified by the request's
    /// session cookie, arrange for the matching Set-Cookie header and
    /// mirror the session's variables into the session table. Returns
    /// the sid.
    fn session_start(&mut self, max_age: Option<i64>) -> Option<String>;

    /// Read a session variable. Needs a prior session_start.
    fn session_var(&self, name: &str) -> Option<String>;

    /// Set or (with None) delete a session variable, mirroring the
    /// change into the session table. Returns the stored value.
    fn set_session_var(&mut self, name: &str, value: Option<&str>) -> Option<String>;

    /// Invalidate the current session and tell the browser to drop
    /// the cookie.
    fn session_destroy(&mut self) -> bool;

    /// The request under evaluation (headers, cookies, get and post
    /// variables).
    fn request(&self) -> &Request;

    fn server_env(&self) -> ServerEnv<'_>;

    /// The engine visible mirror of the session variables
    /// (`env.session`).
    fn session_table(&self) -> &KvList;
}

pub struct HostContext<'c, 'b> {
    sb: &'c mut SendBuf<'b>,
    request: &'c Request,
    sessions: &'c SessionStore,
    remote_addr: &'c str,
    remote_port: u16,
    server_port: u16,
    www_root: &'c str,
    deflate_setting: u32,
    embedded_resources_enabled: bool,
    session_timeout: i64,

    status: u16,
    headers: KvList,
    headers_sent: bool,
    session: Option<Session>,
    session_vars: Option<Arc<Mutex<KvList>>>,
    session_table: KvList,
}

pub struct HostConfig<'c> {
    pub request: &'c Request,
    pub sessions: &'c SessionStore,
    pub remote_addr: &'c str,
    pub remote_port: u16,
    pub server_port: u16,
    pub www_root: &'c str,
    pub deflate_setting: u32,
    pub embedded_resources_enabled: bool,
    pub session_timeout: i64,
}

impl<'c, 'b> HostContext<'c, 'b> {
    pub fn new(sb: &'c mut SendBuf<'b>, cfg: HostConfig<'c>) -> Self {
        // cache defeating headers for dynamic content, emitted in
        // this order; a script can override them via set_header
        // before its first output
        let mut headers = KvList::new();
        headers.push_back(
            "Cache-Control",
            Some(String::from(
                "no-store, no-cache, must-revalidate, post-check=0, pre-check=0",
            )),
        );
        headers.push_back("Expires", Some(String::from(consts::DATE_IN_PAST)));
        headers.push_back("Pragma", Some(String::from("no-cache")));

        HostContext {
            sb,
            request: cfg.request,
            sessions: cfg.sessions,
            remote_addr: cfg.remote_addr,
            remote_port: cfg.remote_port,
            server_port: cfg.server_port,
            www_root: cfg.www_root,
            deflate_setting: cfg.deflate_setting,
            embedded_resources_enabled: cfg.embedded_resources_enabled,
            session_timeout: cfg.session_timeout,
            status: 200,
            headers,
            headers_sent: false,
            session: None,
            session_vars: None,
            session_table: KvList::new(),
        }
    }

    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    /// Emit the pending headers if they have not gone out yet. A
    /// missing content type defaults to text/html.
    pub fn flush_headers(&mut self) -> io::Result<()> {
        if self.headers_sent {
            return Ok(());
        }
        if self.headers.find_ignore_case("Content-Type").is_none() {
            self.headers.push_front("Content-Type", Some(String::from("text/html")));
        }
        reply::send_header(self.sb, self.status, &self.headers, self.request.version)?;
        self.headers_sent = true;
        Ok(())
    }

    fn set_cookie_header(&mut self, value: String) {
        if self.headers_sent {
            return;
        }
        match self.headers.find_mut("Set-Cookie") {
            Some(it) => it.value = Some(value),
            None => self.headers.push_front("Set-Cookie", Some(value)),
        }
    }

    fn table_set(table: &mut KvList, key: &str, value: &str) {
        match table.find_mut(key) {
            Some(it) => it.value = Some(String::from(value)),
            None => table.push_back(key, Some(String::from(value))),
        }
    }
}

impl<'c, 'b> Host for HostContext<'c, 'b> {
    fn echo(&mut self, data: &[u8]) -> io::Result<()> {
        self.flush_headers()?;
        self.sb.write_bytes(data)
    }

    fn response_code(&mut self, code: Option<u16>) -> u16 {
        if let Some(code) = code {
            self.status = code;
        }
        self.status
    }

    fn header(&self, name: &str) -> Option<String> {
        self.headers.find(name).and_then(|it| it.value.clone())
    }

    fn set_header(&mut self, name: &str, value: Option<&str>) {
        match value {
            None => {
                self.headers.remove(name);
            }
            Some(value) => match self.headers.find_mut(name) {
                Some(it) => it.value = Some(String::from(value)),
                None => self.headers.push_front(name, Some(String::from(value))),
            },
        }
    }

    fn session_start(&mut self, max_age: Option<i64>) -> Option<String> {
        let ttl = max_age.unwrap_or(self.session_timeout);
        let sid = self.request.cookies.get(consts::SESSION_COOKIE_NAME);
        let session = self.sessions.start(sid, ttl);

        let vars = match session.get_data(SESSION_VARS_DATA_ID) {
            Some(v) => v,
            None => session.register_data(
                SESSION_VARS_DATA_ID,
                Arc::new(Mutex::new(KvList::new())),
            )?,
        };
        let vars = match vars.downcast::<Mutex<KvList>>() {
            Ok(v) => v,
            Err(_) => {
                warn!("session variable attachment has an unexpected type");
                return None;
            }
        };

        // mirror the stored variables into the engine visible table
        {
            let stored = vars.lock().unwrap();
            for it in stored.iter() {
                if let Some(v) = &it.value {
                    Self::table_set(&mut self.session_table, &it.key, v);
                }
            }
        }

        let sid = String::from(session.sid());
        if ttl >= 0 {
            self.set_cookie_header(format!(
                "{}={}; Max-Age={}",
                consts::SESSION_COOKIE_NAME,
                sid,
                ttl
            ));
        } else {
            self.set_cookie_header(format!(
                "{}={}; Expires={}",
                consts::SESSION_COOKIE_NAME,
                sid,
                consts::DATE_IN_PAST
            ));
        }

        self.session = Some(session);
        self.session_vars = Some(vars);
        Some(sid)
    }

    fn session_var(&self, name: &str) -> Option<String> {
        let vars = self.session_vars.as_ref()?;
        let vars = vars.lock().unwrap();
        vars.get(name).map(String::from)
    }

    fn set_session_var(&mut self, name: &str, value: Option<&str>) -> Option<String> {
        self.session.as_ref()?;
        let vars = Arc::clone(self.session_vars.as_ref()?);
        let mut vars = vars.lock().unwrap();

        match value {
            None => {
                vars.remove(name);
                self.session_table.remove(name);
                None
            }
            Some(value) => {
                match vars.find_mut(name) {
                    Some(it) => it.value = Some(String::from(value)),
                    None => vars.push_front(name, Some(String::from(value))),
                }
                Self::table_set(&mut self.session_table, name, value);
                Some(String::from(value))
            }
        }
    }

    fn session_destroy(&mut self) -> bool {
        let destroyed = match &self.session {
            Some(session) => self.sessions.destroy(session),
            None => return false,
        };
        if destroyed {
            self.session_table = KvList::new();
        }
        self.set_cookie_header(format!(
            "{}=; Expires={}",
            consts::SESSION_COOKIE_NAME,
            consts::DATE_IN_PAST
        ));
        destroyed
    }

    fn request(&self) -> &Request {
        self.request
    }

    fn server_env(&self) -> ServerEnv<'_> {
        ServerEnv {
            remote_addr: self.remote_addr,
            remote_port: self.remote_port,
            server_port: self.server_port,
            www_root: self.www_root,
            script: &self.request.filename,
            request_method: self.request.method.as_str(),
            server_version: consts::SERVER_VERSION,
            deflate_setting: self.deflate_setting,
            embedded_resources_enabled: self.embedded_resources_enabled,
        }
    }

    fn session_table(&self) -> &KvList {
        &self.session_table
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{http::HttpVersion, session::SessionStore};
    use ntest::timeout;

    fn request_with_cookie(sid: Option<&str>) -> Request {
        let mut req = Request::default();
        req.version = HttpVersion::V1_1;
        if let Some(sid) = sid {
            req.cookies.push_back(consts::SESSION_COOKIE_NAME, Some(String::from(sid)));
        }
        req
    }

    fn host_config<'c>(req: &'c Request, store: &'c SessionStore) -> HostConfig<'c> {
        HostConfig {
            request: req,
            sessions: store,
            remote_addr: "127.0.0.1",
            remote_port: 40000,
            server_port: 8181,
            www_root: "",
            deflate_setting: 0,
            embedded_resources_enabled: true,
            session_timeout: 1800,
        }
    }

    #[test]
    #[timeout(30000)]
    fn first_echo_flushes_headers_with_defaults() {
        let store = SessionStore::new();
        let req = request_with_cookie(None);
        let mut sink: Vec<u8> = vec![];
        let mut sb = SendBuf::new(&mut sink, consts::SENDBUF_SIZE);

        let mut host = HostContext::new(&mut sb, host_config(&req, &store));
        host.echo(b"hi").expect("echo");
        host.flush_headers().expect("flush");
        sb.flush_last().expect("flush");

        let out = String::from_utf8(sink).expect("ascii");
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(out.contains("Content-Type: text/html"));
        assert!(out.ends_with("\r\n\r\nhi"));

        // the cache defeating triple goes out in this order
        let cache_control =
            out.find("Cache-Control: no-store, no-cache").expect("cache-control header");
        let expires =
            out.find(&format!("Expires: {}", consts::DATE_IN_PAST)).expect("expires header");
        let pragma = out.find("Pragma: no-cache").expect("pragma header");
        assert!(cache_control < expires && expires < pragma, "header order was: {out}");
    }

    #[test]
    #[timeout(30000)]
    fn headers_can_be_set_and_deleted_before_output() {
        let store = SessionStore::new();
        let req = request_with_cookie(None);
        let mut sink: Vec<u8> = vec![];
        let mut sb = SendBuf::new(&mut sink, consts::SENDBUF_SIZE);

        let mut host = HostContext::new(&mut sb, host_config(&req, &store));
        assert_eq!(host.response_code(None), 200);
        assert_eq!(host.response_code(Some(404)), 404);

        host.set_header("Content-Type", Some("text/plain"));
        host.set_header("X-Custom", Some("1"));
        assert_eq!(host.header("X-Custom").as_deref(), Some("1"));
        host.set_header("X-Custom", None);
        assert_eq!(host.header("X-Custom"), None);

        host.echo(b"gone").expect("echo");
        sb.flush_last().expect("flush");
        let out = String::from_utf8(sink).expect("ascii");
        assert!(out.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(out.contains("Content-Type: text/plain"));
        assert!(!out.contains("X-Custom"));
    }

    #[test]
    #[timeout(30000)]
    fn session_round_trip_via_host() {
        let store = SessionStore::new();

        // first request: no cookie, set a variable
        let req = request_with_cookie(None);
        let mut sink: Vec<u8> = vec![];
        let mut sb = SendBuf::new(&mut sink, consts::SENDBUF_SIZE);
        let mut host = HostContext::new(&mut sb, host_config(&req, &store));

        let sid = host.session_start(None).expect("session to start");
        assert_eq!(sid.len(), 24);
        assert_eq!(
            host.header("Set-Cookie").as_deref(),
            Some(format!("WSESSID={sid}; Max-Age=1800").as_str())
        );
        host.set_session_var("u", Some("alice"));
        assert_eq!(host.session_var("u").as_deref(), Some("alice"));
        assert_eq!(host.session_table().get("u"), Some("alice"));
        drop(host);

        // second request presents the cookie and sees the variable
        let req = request_with_cookie(Some(&sid));
        let mut sink2: Vec<u8> = vec![];
        let mut sb = SendBuf::new(&mut sink2, consts::SENDBUF_SIZE);
        let mut host = HostContext::new(&mut sb, host_config(&req, &store));
        let resumed = host.session_start(None).expect("session to resume");
        assert_eq!(resumed, sid);
        assert_eq!(host.session_var("u").as_deref(), Some("alice"));
        assert_eq!(host.session_table().get("u"), Some("alice"));
    }

    #[test]
    #[timeout(30000)]
    fn session_destroy_clears_table_and_cookie() {
        let store = SessionStore::new();
        let req = request_with_cookie(None);
        let mut sink: Vec<u8> = vec![];
        let mut sb = SendBuf::new(&mut sink, consts::SENDBUF_SIZE);
        let mut host = HostContext::new(&mut sb, host_config(&req, &store));

        assert!(!host.session_destroy(), "destroy without a session must fail");
        host.session_start(None).expect("session to start");
        host.set_session_var("u", Some("alice"));
        assert!(host.session_destroy());
        assert!(host.session_table().is_empty());
        assert_eq!(
            host.header("Set-Cookie").as_deref(),
            Some(format!("WSESSID=; Expires={}", consts::DATE_IN_PAST).as_str())
        );
    }

    #[test]
    #[timeout(30000)]
    fn session_vars_need_a_started_session() {
        let store = SessionStore::new();
        let req = request_with_cookie(None);
        let mut sink: Vec<u8> = vec![];
        let mut sb = SendBuf::new(&mut sink, consts::SENDBUF_SIZE);
        let mut host = HostContext::new(&mut sb, host_config(&req, &store));

        assert_eq!(host.session_var("u"), None);
        assert_eq!(host.set_session_var("u", Some("alice")), None);
    }

    #[test]
    #[timeout(30000)]
    fn negative_ttl_expires_the_cookie() {
        let store = SessionStore::new();
        let req = request_with_cookie(None);
        let mut sink: Vec<u8> = vec![];
        let mut sb = SendBuf::new(&mut sink, consts::SENDBUF_SIZE);
        let mut host = HostContext::new(&mut sb, host_config(&req, &store));

        let sid = host.session_start(Some(-1)).expect("session to start");
        let cookie = host.header("Set-Cookie").expect("cookie header");
        assert!(cookie.starts_with(&format!("WSESSID={sid}; Expires=")));
        assert!(cookie.ends_with(consts::DATE_IN_PAST));
    }
}
