//! Configuration: CLI flags, environment and an optional TOML file, frozen
//! into a [`BridgeConfig`] before the bridge starts.

use crate::error::ConfigError;
use clap::{Parser, ValueEnum};
use mcpbridge_transport::{ClientConfig, Endpoint};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "mcpbridge", version)]
#[command(about = "Bridge a stdio MCP client to a remote MCP server", long_about = None)]
pub struct Cli {
    /// Remote MCP server URL (http/https), or a command to spawn
    #[arg(short, long, env = "MCPBRIDGE_SERVER")]
    pub server: Option<String>,

    /// API key sent as a bearer token
    #[arg(short, long, env = "MCPBRIDGE_API_KEY", hide_env_values = true)]
    pub key: Option<String>,

    /// Path to configuration file
    #[arg(short, long, default_value = "mcpbridge.toml")]
    pub config: PathBuf,

    /// Enable debug logging for everything
    #[arg(long)]
    pub debug: bool,

    /// Log traffic on the local (stdio) side
    #[arg(long)]
    pub debug_client: bool,

    /// Log traffic on the remote side, including child stderr
    #[arg(long)]
    pub debug_server: bool,

    /// Log output format
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Seconds to wait for the streaming connection
    #[arg(long, value_name = "SECS")]
    pub detect_timeout: Option<u64>,

    /// Seconds to wait for a response to each request
    #[arg(long, value_name = "SECS")]
    pub request_timeout: Option<u64>,

    /// Seconds allowed for each HTTP POST
    #[arg(long, value_name = "SECS")]
    pub http_timeout: Option<u64>,

    /// Seconds to drain in-flight requests and stop the remote on shutdown
    #[arg(long, value_name = "SECS")]
    pub shutdown_grace: Option<u64>,

    /// Arguments for the child process when --server is a command
    #[arg(last = true)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DebugFlags {
    pub all: bool,
    pub client: bool,
    pub server: bool,
}

impl DebugFlags {
    pub fn any(&self) -> bool {
        self.all || self.client || self.server
    }
}

/// Contents of the optional TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub server: Option<String>,
    pub api_key: Option<String>,
    pub args: Vec<String>,
    pub log_format: Option<LogFormat>,
    pub debug: DebugFlags,
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_detect_secs")]
    pub detect_secs: u64,

    #[serde(default = "default_request_secs")]
    pub request_secs: u64,

    #[serde(default = "default_http_secs")]
    pub http_secs: u64,

    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_detect_secs() -> u64 {
    5
}

fn default_request_secs() -> u64 {
    300
}

fn default_http_secs() -> u64 {
    60
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            detect_secs: default_detect_secs(),
            request_secs: default_request_secs(),
            http_secs: default_http_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl FileConfig {
    /// Load the file if it exists; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Frozen configuration consumed by the bridge runtime.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub endpoint: Endpoint,
    pub api_key: Option<String>,
    pub debug: DebugFlags,
    pub log_format: LogFormat,
    pub detect_timeout: Duration,
    pub request_timeout: Duration,
    pub http_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl BridgeConfig {
    /// A configuration with default timeouts for `endpoint`.
    pub fn new(endpoint: Endpoint) -> Self {
        let timeouts = TimeoutConfig::default();
        Self {
            endpoint,
            api_key: None,
            debug: DebugFlags::default(),
            log_format: LogFormat::default(),
            detect_timeout: Duration::from_secs(timeouts.detect_secs),
            request_timeout: Duration::from_secs(timeouts.request_secs),
            http_timeout: Duration::from_secs(timeouts.http_secs),
            shutdown_grace: Duration::from_secs(timeouts.shutdown_grace_secs),
        }
    }

    /// Read the file named by `--config` and merge it under the CLI.
    pub fn load(cli: Cli) -> Result<Self, ConfigError> {
        let file = FileConfig::load(&cli.config)?;
        Self::resolve(cli, file)
    }

    /// Merge sources; CLI flags (and their environment variables) win over the file.
    pub fn resolve(cli: Cli, file: FileConfig) -> Result<Self, ConfigError> {
        let server = cli
            .server
            .or(file.server)
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::MissingRemote)?;
        let args = if cli.args.is_empty() {
            file.args
        } else {
            cli.args
        };
        let endpoint = Endpoint::parse(&server, args).map_err(ConfigError::InvalidRemote)?;

        let secs = |flag: Option<u64>, file: u64| Duration::from_secs(flag.unwrap_or(file));

        Ok(Self {
            endpoint,
            api_key: cli.key.or(file.api_key).filter(|k| !k.is_empty()),
            debug: DebugFlags {
                all: cli.debug || file.debug.all,
                client: cli.debug_client || file.debug.client,
                server: cli.debug_server || file.debug.server,
            },
            log_format: cli.log_format.or(file.log_format).unwrap_or_default(),
            detect_timeout: secs(cli.detect_timeout, file.timeouts.detect_secs),
            request_timeout: secs(cli.request_timeout, file.timeouts.request_secs),
            http_timeout: secs(cli.http_timeout, file.timeouts.http_secs),
            shutdown_grace: secs(cli.shutdown_grace, file.timeouts.shutdown_grace_secs),
        })
    }

    /// Settings handed to the transport layer.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            api_key: self.api_key.clone(),
            timeout: self.http_timeout,
            detect_timeout: self.detect_timeout,
            close_grace: self.shutdown_grace,
        }
    }
}
