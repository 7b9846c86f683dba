//! Client configuration, loaded from a JSON file.
//!
//! ```json
//! {
//!   "protocol": "udp",
//!   "local_port": 0,
//!   "target": { "host": "127.0.0.1", "port": 57120 },
//!   "max_packet_size": 8192,
//!   "dump": { "incoming": "off", "outgoing": "text" }
//! }
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::dump::DumpMode;
use crate::error::{Error, Result};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_MAX_PACKET_SIZE: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Udp,
    Tcp,
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Ok(Protocol::Udp),
            "tcp" => Ok(Protocol::Tcp),
            _ => Err(Error::InvalidCommand(format!("unknown protocol '{}'", s))),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Udp => write!(f, "udp"),
            Protocol::Tcp => write!(f, "tcp"),
        }
    }
}

/// Where outgoing packets go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
}

impl FromStr for TargetConfig {
    type Err = Error;

    /// `HOST:PORT`; IPv6 hosts are written in brackets, as in `[::1]:9000`.
    fn from_str(s: &str) -> Result<Self> {
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(TargetConfig {
                host: addr.ip().to_string(),
                port: addr.port(),
            });
        }
        let invalid = || Error::InvalidCommand(format!("target '{}' must be HOST:PORT", s));
        let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() || host.contains(':') {
            return Err(invalid());
        }
        Ok(TargetConfig {
            host: host.to_string(),
            port: port.parse().map_err(|_| invalid())?,
        })
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DumpConfig {
    #[serde(default)]
    pub incoming: DumpMode,
    #[serde(default)]
    pub outgoing: DumpMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub protocol: Protocol,
    /// Local port to bind; 0 picks an ephemeral port.
    #[serde(default)]
    pub local_port: u16,
    #[serde(default)]
    pub target: Option<TargetConfig>,
    /// Largest datagram we send or accept.
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,
    #[serde(default)]
    pub dump: DumpConfig,
}

fn default_max_packet_size() -> usize {
    DEFAULT_MAX_PACKET_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            protocol: Protocol::default(),
            local_port: 0,
            target: None,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            dump: DumpConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            source: Box::new(e),
        })?;
        serde_json::from_str(&content).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            source: Box::new(e),
        })
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!("no config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }
}
