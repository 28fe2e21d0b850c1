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

//! The dispatcher: sets up the listener sockets (IPv4 and, when
//! enabled, IPv6), accepts connections and hands each one to a
//! detached worker thread. Shutdown is signal driven: the signal
//! handler closes the listeners, the accept loops notice and exit,
//! and the worker registry waits for in-flight requests to finish.

pub mod commands;
mod registry;
mod signals;
mod worker;

use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener},
    os::unix::io::AsRawFd,
    path::{Component, Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread,
};

use anyhow::{anyhow, Context};
use socket2::{Domain, Socket, Type};
use tracing::{error, info, instrument, warn};

use crate::{
    config::Settings,
    consts,
    scripting::ScriptEngine,
    server::{commands::CommandTable, registry::WorkerRegistry},
    session::SessionStore,
};

/// Process-wide state shared by all workers: the settings snapshot
/// captured at startup, the session store, the worker registry, the
/// command table and the injected script engine.
pub(crate) struct Shared {
    pub settings: Settings,
    pub sessions: SessionStore,
    pub registry: WorkerRegistry,
    pub commands: CommandTable,
    pub engine: Option<Box<dyn ScriptEngine>>,
    pub hits: AtomicU64,
}

pub struct Server {
    shared: Arc<Shared>,
    listeners: Vec<TcpListener>,
    shutdown: Arc<AtomicBool>,
}

impl Server {
    /// Bind the listener sockets. Either address family may fail to
    /// come up (no IPv6 on the host, say) as long as one of them
    /// binds.
    pub fn bind(
        settings: Settings,
        engine: Option<Box<dyn ScriptEngine>>,
    ) -> anyhow::Result<Server> {
        let mut listeners = vec![];

        if settings.ipv6 {
            match bind_listener(Domain::IPV6, settings.port) {
                Ok(l) => listeners.push(l),
                Err(err) => warn!("could not set up IPv6 listener: {:?}", err),
            }
        }
        match bind_listener(Domain::IPV4, settings.port) {
            Ok(l) => listeners.push(l),
            Err(err) => {
                if listeners.is_empty() {
                    error!("could not set up IPv4 listener: {:?}", err);
                } else {
                    warn!("could not set up IPv4 listener: {:?}", err);
                }
            }
        }
        if listeners.is_empty() {
            return Err(anyhow!("could not set up an IPv4 or IPv6 listener"));
        }

        let shared = Arc::new(Shared {
            settings,
            sessions: SessionStore::new(),
            registry: WorkerRegistry::new(),
            commands: CommandTable::new(),
            engine,
            hits: AtomicU64::new(0),
        });

        Ok(Server { shared, listeners, shutdown: Arc::new(AtomicBool::new(false)) })
    }

    /// The addresses actually bound, mainly so tests can bind port 0.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.iter().filter_map(|l| l.local_addr().ok()).collect()
    }

    /// Install the signal handler and serve until a termination
    /// signal closes the listeners.
    #[instrument(skip_all)]
    pub fn serve(self) -> anyhow::Result<()> {
        let fds = self.listeners.iter().map(|l| l.as_raw_fd()).collect();
        signals::Handler::new(fds, Arc::clone(&self.shutdown)).spawn()?;

        let mut accept_threads = vec![];
        for listener in self.listeners {
            let shared = Arc::clone(&self.shared);
            let shutdown = Arc::clone(&self.shutdown);
            accept_threads.push(thread::spawn(move || accept_loop(shared, listener, shutdown)));
        }
        for h in accept_threads {
            h.join().map_err(|e| anyhow!("joining accept loop: {:?}", e))?;
        }

        // no new workers past this point, give running ones some time
        self.shared.registry.shutdown();
        info!("exiting");
        Ok(())
    }
}

/// Run the server until it is shut down by a signal.
pub fn run(settings: Settings, engine: Option<Box<dyn ScriptEngine>>) -> anyhow::Result<()> {
    info!("starting web server on port {}", settings.port);
    Server::bind(settings, engine)?.serve()
}

fn accept_loop(shared: Arc<Shared>, listener: TcpListener, shutdown: Arc<AtomicBool>) {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                let hit = shared.hits.fetch_add(1, Ordering::SeqCst) + 1;
                info!("connection from {} (hit {})", peer, hit);
                let shared = Arc::clone(&shared);
                thread::spawn(move || worker::run(shared, stream, peer, hit));
            }
            Err(err) => {
                if shutdown.load(Ordering::SeqCst) {
                    // the signal handler closed the listener
                    break;
                }
                error!("accepting connection: {}", err);
            }
        }
    }
}

fn bind_listener(domain: Domain, port: u16) -> anyhow::Result<TcpListener> {
    let socket = Socket::new(domain, Type::STREAM, None).context("creating socket")?;
    socket.set_reuse_address(true).context("setting SO_REUSEADDR")?;

    let addr: SocketAddr = if domain == Domain::IPV6 {
        // keep the v6 socket from claiming the v4 side too, the v4
        // listener binds separately
        socket.set_only_v6(true).context("setting IPV6_V6ONLY")?;
        (Ipv6Addr::UNSPECIFIED, port).into()
    } else {
        (Ipv4Addr::UNSPECIFIED, port).into()
    };
    socket.bind(&addr.into()).context("binding listener")?;
    socket.listen(consts::LISTEN_BACKLOG).context("listening")?;
    Ok(socket.into())
}

/// Map a decoded request path into the www root. Paths that are
/// absolute or climb upwards resolve to nothing and get a 403.
pub(crate) fn resolve_www_path(root: &str, filename: &str) -> Option<PathBuf> {
    let rel = Path::new(filename);
    for comp in rel.components() {
        match comp {
            Component::Normal(_) | Component::CurDir => {}
            _ => return None,
        }
    }
    Some(Path::new(root).join(rel))
}
