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

use std::{fs, path::Path};

use anyhow::{anyhow, Context};
use serde_derive::Deserialize;
use tracing::info;

use crate::{consts, Args};

/// The configuration file as written by the user. Everything is
/// optional; defaults are applied when resolving into `Settings`.
#[derive(Deserialize, Default, Debug, Clone)]
pub struct Config {
    pub server: Option<ServerConfig>,
    pub scripting: Option<ScriptingConfig>,
    pub scripting_cache: Option<ScriptingCacheConfig>,
}

#[derive(Deserialize, Default, Debug, Clone)]
pub struct ServerConfig {
    /// Directory static files are served from. No www root means only
    /// embedded resources and server commands are reachable.
    pub wwwroot: Option<String>,

    /// Port to listen on, 8181 by default.
    pub port: Option<u16>,

    /// The file to write logs to. Without it logs go to stderr.
    pub logfile: Option<String>,

    /// Log level for the log file, 0 (off) through 6 (verbose).
    pub loglevel_file: Option<u8>,

    /// Log level for console output, 0 (off) through 6 (verbose).
    pub loglevel_console: Option<u8>,

    /// Whether to also listen on the IPv6 wildcard address. On by
    /// default.
    pub ipv6: Option<bool>,

    /// Deflate compression level for compressible static content.
    /// 0 disables compression, 1 is fastest, 9 compresses best.
    pub deflate: Option<u32>,

    /// Disable the resources compiled into the binary.
    pub disable_embedded_res: Option<bool>,
}

#[derive(Deserialize, Default, Debug, Clone)]
pub struct ScriptingConfig {
    /// Server page evaluation, on by default (it still needs a script
    /// engine to be injected by the embedder).
    pub enabled: Option<bool>,

    /// Write script error messages into the http response in addition
    /// to the log. Handy during development, on by default.
    pub error_output_socket: Option<bool>,

    /// Default session lifetime in seconds for session_start.
    pub session_timeout: Option<i64>,

    /// Reserved: caching of preprocessed pages. The keys below are
    /// recognized but no cache is built yet.
    pub caching: Option<bool>,
}

#[derive(Deserialize, Default, Debug, Clone)]
pub struct ScriptingCacheConfig {
    pub cache_tmpfile: Option<bool>,
    pub cache_memory: Option<bool>,
    pub cache_memory_limit_mb: Option<u32>,
    pub cache_tmpfile_limit_mb: Option<u32>,
}

/// Read the configuration. An explicitly passed file must exist and
/// parse; the default file is used only when present.
pub fn read_config(config_file: &Option<String>) -> anyhow::Result<Config> {
    let mut config = Config::default();
    if let Some(config_path) = config_file {
        info!("parsing explicitly passed in config ({})", config_path);
        let config_str = fs::read_to_string(config_path).context("reading config toml (1)")?;
        config = toml::from_str(&config_str).context("parsing config file (1)")?;
    } else if Path::new(consts::DEFAULT_CONFIG_FILE).exists() {
        let config_str =
            fs::read_to_string(consts::DEFAULT_CONFIG_FILE).context("reading config toml (2)")?;
        config = toml::from_str(&config_str).context("parsing config file (2)")?;
    }
    Ok(config)
}

/// The immutable settings snapshot captured at startup and shared by
/// all workers.
#[derive(Debug, Clone)]
pub struct Settings {
    pub wwwroot: Option<String>,
    pub port: u16,
    pub logfile: Option<String>,
    pub loglevel_file: u8,
    pub loglevel_console: u8,
    pub ipv6: bool,
    pub deflate: u32,
    pub disable_embedded_res: bool,
    pub scripting: ScriptingSettings,
}

#[derive(Debug, Clone)]
pub struct ScriptingSettings {
    pub enabled: bool,
    pub error_output_socket: bool,
    pub session_timeout: i64,
    pub caching: bool,
}

impl Settings {
    /// Apply defaults and command line overrides on top of the parsed
    /// config file.
    pub fn resolve(args: &Args, config: Config) -> anyhow::Result<Settings> {
        let server = config.server.unwrap_or_default();
        let scripting = config.scripting.unwrap_or_default();

        let mut settings = Settings {
            wwwroot: args.wwwroot.clone().or(server.wwwroot),
            port: args.port.unwrap_or(server.port.unwrap_or(8181)),
            logfile: args.log_file.clone().or(server.logfile),
            loglevel_file: args.file_log_level.unwrap_or(server.loglevel_file.unwrap_or(3)),
            loglevel_console: args
                .console_log_level
                .unwrap_or(server.loglevel_console.unwrap_or(2)),
            ipv6: server.ipv6.unwrap_or(true),
            deflate: args.deflate.unwrap_or(server.deflate.unwrap_or(0)),
            disable_embedded_res: args.no_embedded_resources
                || server.disable_embedded_res.unwrap_or(false),
            scripting: ScriptingSettings {
                enabled: scripting.enabled.unwrap_or(true),
                error_output_socket: scripting.error_output_socket.unwrap_or(true),
                session_timeout: scripting.session_timeout.unwrap_or(1800),
                caching: scripting.caching.unwrap_or(false),
            },
        };

        if settings.port < consts::SERVER_PORT_MIN || settings.port > consts::SERVER_PORT_MAX {
            return Err(anyhow!(
                "port must be from {}-{} (is {})",
                consts::SERVER_PORT_MIN,
                consts::SERVER_PORT_MAX,
                settings.port
            ));
        }
        if settings.deflate > 9 {
            return Err(anyhow!("deflate level must be from 0-9 (is {})", settings.deflate));
        }
        if settings.loglevel_file > 6 || settings.loglevel_console > 6 {
            return Err(anyhow!("log levels must be from 0-6"));
        }

        // make sure the www root carries a trailing separator so
        // request paths can simply be appended
        if let Some(root) = &mut settings.wwwroot {
            if !root.ends_with('/') {
                root.push('/');
            }
        }

        Ok(settings)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::Parser;
    use ntest::timeout;

    fn no_args() -> Args {
        Args::parse_from(["bramble"])
    }

    #[test]
    #[timeout(30000)]
    fn parse_sections() -> anyhow::Result<()> {
        let cases = vec![
            r#"
            [server]
            port = 8080
            wwwroot = "/var/www"
            deflate = 6
            "#,
            r#"
            [server]
            ipv6 = false
            [scripting]
            enabled = true
            session_timeout = 600
            "#,
            r#"
            [scripting_cache]
            cache_memory = true
            cache_memory_limit_mb = 10
            "#,
        ];

        for case in cases.into_iter() {
            let _: Config = toml::from_str(case)?;
        }

        Ok(())
    }

    #[test]
    #[timeout(30000)]
    fn defaults_apply() -> anyhow::Result<()> {
        let settings = Settings::resolve(&no_args(), Config::default())?;
        assert_eq!(settings.port, 8181);
        assert!(settings.ipv6);
        assert_eq!(settings.deflate, 0);
        assert!(settings.scripting.enabled);
        assert_eq!(settings.scripting.session_timeout, 1800);
        Ok(())
    }

    #[test]
    #[timeout(30000)]
    fn cli_overrides_config() -> anyhow::Result<()> {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 9000
            wwwroot = "/var/www"
            "#,
        )?;
        let args = Args::parse_from(["bramble", "-p", "8080", "-r", "/tmp/site"]);
        let settings = Settings::resolve(&args, config)?;
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.wwwroot.as_deref(), Some("/tmp/site/"));
        Ok(())
    }

    #[test]
    #[timeout(30000)]
    fn out_of_range_values_are_rejected() {
        let bad = vec![
            Args::parse_from(["bramble", "-p", "0"]),
            Args::parse_from(["bramble", "-d", "10"]),
            Args::parse_from(["bramble", "-F", "7"]),
        ];
        for args in bad {
            assert!(Settings::resolve(&args, Config::default()).is_err());
        }
    }
}
