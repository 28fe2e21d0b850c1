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

//! bramble is a small, self contained web server: static files,
//! resources embedded in the binary, and server pages evaluated by an
//! embedded script interpreter, with per-client sessions, deflate
//! compression and chunked transfer encoding. It runs one worker
//! thread per connection.
//!
//! The script interpreter is injected by the embedder through
//! [`scripting::ScriptEngine`]; without one, server page requests
//! fall through to the static file rules.

use std::{fs, io, sync::Mutex};

use anyhow::Context;
use clap::Parser;
use tracing::error;

pub mod config;
pub mod consts;
pub mod http;
pub mod kvlist;
pub mod resources;
pub mod scripting;
pub mod server;
pub mod session;

pub use scripting::ScriptEngine;

/// The command line arguments bramble expects. These can be directly
/// parsed with clap or constructed manually in order to present some
/// other user interface.
#[derive(Parser, Debug, Default)]
#[clap(version, about)]
pub struct Args {
    #[clap(short = 'p', long, help = "The port to listen on (1-60000)")]
    pub port: Option<u16>,

    #[clap(short = 'c', long, help = "A toml file containing configuration")]
    pub config_file: Option<String>,

    #[clap(
        short = 'r',
        long = "wwwroot",
        help = "The directory to serve static files from; without it only \
                embedded resources and server commands are reachable"
    )]
    pub wwwroot: Option<String>,

    #[clap(
        short = 'l',
        long,
        long_help = "The file to write logs to

Without a log file, logs go to stderr filtered by the console log level."
    )]
    pub log_file: Option<String>,

    #[clap(
        short = 'F',
        long,
        help = "File log level, 0 (off) through 6 (verbose)"
    )]
    pub file_log_level: Option<u8>,

    #[clap(
        short = 'C',
        long,
        help = "Console log level, 0 (off) through 6 (verbose)"
    )]
    pub console_log_level: Option<u8>,

    #[clap(
        short = 'D',
        long,
        action,
        help = "Disable the resources embedded in the binary"
    )]
    pub no_embedded_resources: bool,

    #[clap(
        short = 'd',
        long,
        help = "Deflate compression level for static content, 0 (off) to 9 (best)"
    )]
    pub deflate: Option<u32>,
}

/// Map the numeric 0-6 log levels onto tracing filter levels.
fn trace_level(level: u8) -> tracing::level_filters::LevelFilter {
    use tracing::level_filters::LevelFilter;
    match level {
        0 => LevelFilter::OFF,
        1 | 2 => LevelFilter::ERROR,
        3 => LevelFilter::WARN,
        4 => LevelFilter::INFO,
        5 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Run the server with the given arguments. An embedder that wants
/// server pages passes its interpreter as `engine`; with `None`,
/// server page requests are served like static files.
pub fn run(args: Args, engine: Option<Box<dyn ScriptEngine>>) -> anyhow::Result<()> {
    let config = config::read_config(&args.config_file)?;
    let settings = config::Settings::resolve(&args, config)?;

    if let Some(log_file) = settings.logfile.clone() {
        let file = fs::File::create(&log_file)
            .with_context(|| format!("creating log file {log_file}"))?;
        tracing_subscriber::fmt()
            .with_max_level(trace_level(settings.loglevel_file))
            .with_thread_ids(true)
            .with_target(false)
            .with_writer(Mutex::new(file))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(trace_level(settings.loglevel_console))
            .with_thread_ids(true)
            .with_target(false)
            .with_writer(io::stderr)
            .init();
    }

    if let Err(err) = server::run(settings, engine) {
        error!("{:?}", err);
        return Err(err);
    }
    Ok(())
}
