//! Bridge configuration with environment overrides.

use std::net::SocketAddr;
use std::time::Duration;

use crate::bridge::codec::DEFAULT_MAX_FRAME_BYTES;
use crate::supervisor::DEFAULT_TIMEOUT;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 9876;
pub const DEFAULT_HTTP_PORT: u16 = 9875;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid bind address {addr:?}: {source}")]
    InvalidAddress {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub host: String,
    /// Port for the newline-framed socket transport.
    pub port: u16,
    /// Port for the RPC-over-HTTP transport.
    pub http_port: u16,
    /// How long a caller waits for the host thread.
    pub timeout: Duration,
    /// How long a connection may take to deliver one complete frame.
    pub read_timeout: Duration,
    pub max_frame_bytes: usize,
    /// Keep socket connections open for further requests after a response.
    pub persistent_connections: bool,
    /// How long stop() waits for in-flight connections.
    pub shutdown_grace: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            http_port: DEFAULT_HTTP_PORT,
            timeout: DEFAULT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            persistent_connections: false,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `HOSTBRIDGE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(host) = lookup("HOSTBRIDGE_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("HOSTBRIDGE_PORT") {
            config.port = parse_var("HOSTBRIDGE_PORT", &port)?;
        }
        if let Some(port) = lookup("HOSTBRIDGE_HTTP_PORT") {
            config.http_port = parse_var("HOSTBRIDGE_HTTP_PORT", &port)?;
        }
        if let Some(secs) = lookup("HOSTBRIDGE_TIMEOUT_SECS") {
            config.timeout = parse_secs("HOSTBRIDGE_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = lookup("HOSTBRIDGE_READ_TIMEOUT_SECS") {
            config.read_timeout = parse_secs("HOSTBRIDGE_READ_TIMEOUT_SECS", &secs)?;
        }
        if let Some(flag) = lookup("HOSTBRIDGE_PERSISTENT") {
            config.persistent_connections = match flag.as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        var: "HOSTBRIDGE_PERSISTENT",
                        value: flag,
                        reason: "expected true/false".to_string(),
                    });
                }
            };
        }

        Ok(config)
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_http_port(mut self, port: u16) -> Self {
        self.http_port = port;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_max_frame_bytes(mut self, max: usize) -> Self {
        self.max_frame_bytes = max;
        self
    }

    pub fn with_persistent_connections(mut self, persistent: bool) -> Self {
        self.persistent_connections = persistent;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        resolve_addr(&self.host, self.port)
    }

    pub fn http_addr(&self) -> Result<SocketAddr, ConfigError> {
        resolve_addr(&self.host, self.http_port)
    }
}

fn resolve_addr(host: &str, port: u16) -> Result<SocketAddr, ConfigError> {
    // Host add-ons commonly configure "localhost"; SocketAddr parsing needs an IP.
    let host = if host == "localhost" { DEFAULT_HOST } else { host };
    let addr = if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    };
    addr.parse()
        .map_err(|source| ConfigError::InvalidAddress { addr, source })
}

fn parse_var<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_secs(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let secs: f64 = parse_var(var, value)?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ConfigError::InvalidValue {
            var,
            value: value.to_string(),
            reason: "must be a positive number of seconds".to_string(),
        });
    }
    Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::InvalidValue {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}
