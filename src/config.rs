use std::fmt;
use std::time::Duration;

use crate::error::{KickoffError, Result};

pub const DEFAULT_PORT: u16 = 3355;

/// `list` refuses to answer past this many live tasks. The command is a
/// debugging tool for small deployments, not a cluster-scale query.
pub const MAX_LIST_TASKS: usize = 1000;

/// A dispatched task whose heartbeat is older than this is a zombie.
/// Must stay at least 3x the worker heartbeat interval.
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECS: i64 = 60;

pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(10);

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub cleanup_interval: Duration,
    pub heartbeat_timeout_secs: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            heartbeat_timeout_secs: DEFAULT_HEARTBEAT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub heartbeat_interval: Duration,
    /// Idle polling starts here and backs off slowly toward the maximum.
    pub min_poll_interval: Duration,
    pub max_poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            min_poll_interval: Duration::from_secs(1),
            max_poll_interval: Duration::from_secs(60),
        }
    }
}

/// `HOST[:PORT]` as given on the command line. Hostnames are resolved at
/// connect time.
#[derive(Debug, Clone)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn parse(connection_str: &str, default_port: u16) -> Result<Self> {
        let parts: Vec<&str> = connection_str.split(':').collect();
        if parts.len() > 2 || parts[0].is_empty() {
            return Err(KickoffError::InvalidAddress(connection_str.to_string()));
        }

        let port = match parts.get(1) {
            Some(port_str) => port_str
                .parse::<u16>()
                .ok()
                .filter(|port| *port != 0)
                .ok_or_else(|| KickoffError::InvalidPort(port_str.to_string()))?,
            None => default_port,
        };

        Ok(Self {
            host: parts[0].to_string(),
            port,
        })
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Split a tag list on space, comma, or semicolon, dropping empty tokens.
pub fn parse_resource_tags(list_str: &str) -> Vec<String> {
    list_str
        .split([' ', ',', ';'])
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}
