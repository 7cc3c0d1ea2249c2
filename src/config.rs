//! talkrelay configuration
//!
//! Configuration comes from environment variables, read once at startup.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default listen port
pub const DEFAULT_PORT: u16 = 10000;

/// talkrelay configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (default: 0.0.0.0)
    pub bind_addr: IpAddr,
    /// Listen port (default: 10000)
    pub port: u16,
    /// FCM server key. Push is disabled when absent.
    pub fcm_server_key: Option<String>,
    /// FCM send endpoint override
    pub fcm_endpoint: Option<String>,
    /// Push request timeout in milliseconds (optional)
    pub push_timeout_ms: Option<u64>,
    /// Per-connection outbound queue length (default: 256)
    pub outbound_capacity: usize,
    /// Keepalive ping interval in seconds, 0 disables (default: 30)
    pub ping_interval: u64,
    /// Registry sweep interval in seconds, 0 disables (default: 60)
    pub sweep_interval: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            fcm_server_key: None,
            fcm_endpoint: None,
            push_timeout_ms: Some(5000),
            outbound_capacity: 256,
            ping_interval: 30,
            sweep_interval: 60,
        }
    }
}

impl Config {
    /// Create config from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create config from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(port) = var("PORT") {
            config.port = parse(&port, "PORT", "expected port number")?;
        }

        if let Some(addr) = var("BIND_ADDR") {
            config.bind_addr = parse(&addr, "BIND_ADDR", "expected IP address")?;
        }

        config.fcm_server_key = var("FCM_SERVER_KEY");
        config.fcm_endpoint = var("FCM_ENDPOINT");

        if let Some(timeout) = var("PUSH_TIMEOUT_MS") {
            let ms: u64 = parse(&timeout, "PUSH_TIMEOUT_MS", "expected u64")?;
            config.push_timeout_ms = if ms == 0 { None } else { Some(ms) };
        }

        if let Some(capacity) = var("OUTBOUND_CAPACITY") {
            config.outbound_capacity = parse(&capacity, "OUTBOUND_CAPACITY", "expected usize")?;
            if config.outbound_capacity == 0 {
                return Err(ConfigError::InvalidEnv("OUTBOUND_CAPACITY", "must be positive"));
            }
        }

        if let Some(interval) = var("PING_INTERVAL") {
            config.ping_interval = parse(&interval, "PING_INTERVAL", "expected u64")?;
        }

        if let Some(interval) = var("SWEEP_INTERVAL") {
            config.sweep_interval = parse(&interval, "SWEEP_INTERVAL", "expected u64")?;
        }

        Ok(config)
    }

    /// Get the listen socket address
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    pub fn push_timeout(&self) -> Option<Duration> {
        self.push_timeout_ms.map(Duration::from_millis)
    }

    pub fn ping_period(&self) -> Option<Duration> {
        (self.ping_interval > 0).then(|| Duration::from_secs(self.ping_interval))
    }

    pub fn sweep_period(&self) -> Option<Duration> {
        (self.sweep_interval > 0).then(|| Duration::from_secs(self.sweep_interval))
    }
}

fn parse<T: std::str::FromStr>(
    value: &str,
    name: &'static str,
    expected: &'static str,
) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv(name, expected))
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid environment variable {0}: {1}")]
    InvalidEnv(&'static str, &'static str),
}
