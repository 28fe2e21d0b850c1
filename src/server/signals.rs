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

use std::{
    os::unix::io::RawFd,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

use anyhow::Context;
use signal_hook::{
    consts::{SIGABRT, SIGINT, SIGTERM},
    iterator::Signals,
};
use tracing::{info, warn};

/// Signal driven shutdown: the handler thread sets the shutdown flag
/// and shuts down the listener sockets, which unblocks the accept
/// loops and lets the dispatcher exit its main loop.
pub struct Handler {
    listeners: Vec<RawFd>,
    shutdown: Arc<AtomicBool>,
}

impl Handler {
    pub fn new(listeners: Vec<RawFd>, shutdown: Arc<AtomicBool>) -> Self {
        Handler { listeners, shutdown }
    }

    pub fn spawn(self) -> anyhow::Result<()> {
        info!("spawning signal handler thread");

        let mut signals =
            Signals::new([SIGABRT, SIGTERM, SIGINT]).context("creating signal iterator")?;
        thread::spawn(move || {
            // Signals are exposed via an iterator so this loop is just
            // to consume that by blocking until the first value is
            // emitted.
            #[allow(clippy::never_loop)]
            for signal in &mut signals {
                info!("caught signal {}, shutting down listeners", signal);
                self.shutdown.store(true, Ordering::SeqCst);
                for fd in &self.listeners {
                    if let Err(e) = nix::sys::socket::shutdown(*fd, nix::sys::socket::Shutdown::Both)
                    {
                        // already closed is fine, anything else is
                        // worth a log line
                        warn!("shutting down listener fd {}: {}", fd, e);
                    }
                }
                break;
            }
        });

        Ok(())
    }
}
