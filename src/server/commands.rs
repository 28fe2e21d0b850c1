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

//! Built-in server commands, addressed by an exact match on the
//! request path. The table is built once at startup and handed to the
//! workers; commands produce their reply directly through the send
//! buffer.

use std::io;

use crate::{
    config::Settings,
    consts,
    http::{reply, request::Request, sendbuf::SendBuf},
    kvlist::KvList,
};

pub struct CommandArgs<'c> {
    pub request: &'c Request,
    pub settings: &'c Settings,
    pub hit: u64,
    pub worker_count: u64,
    pub session_count: usize,
}

type CommandFn = fn(&CommandArgs<'_>, &mut SendBuf<'_>) -> io::Result<()>;

pub struct Command {
    name: &'static str,
    run: CommandFn,
}

impl Command {
    pub fn run(&self, args: &CommandArgs<'_>, sb: &mut SendBuf<'_>) -> io::Result<()> {
        (self.run)(args, sb)
    }
}

pub struct CommandTable {
    commands: Vec<Command>,
}

impl CommandTable {
    pub fn new() -> Self {
        CommandTable { commands: vec![Command { name: "_status", run: cmd_status }] }
    }

    pub fn find(&self, name: &str) -> Option<&Command> {
        self.commands.iter().find(|c| c.name == name)
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        CommandTable::new()
    }
}

/// `/_status`: a small json document with server state, mostly for
/// monitoring and tests.
fn cmd_status(args: &CommandArgs<'_>, sb: &mut SendBuf<'_>) -> io::Result<()> {
    let mut headers = KvList::new();
    headers.push_back("Content-Type", Some(String::from("application/json")));
    reply::send_header(sb, 200, &headers, args.request.version)?;

    sb.write_str("{\"server\":\"")?;
    sb.write_json_ascii(consts::SERVER_VERSION)?;
    sb.write_str(&format!(
        "\",\"hits\":{},\"workers\":{},\"sessions\":{}}}",
        args.hit, args.worker_count, args.session_count
    ))
}
