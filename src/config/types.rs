//! Configuration Types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub transport: TransportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Transport configuration
///
/// A snapshot of this structure is attached to every channel created while
/// it was in effect.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    pub protocol: String,
    pub bind_addr: SocketAddr,
    pub buffer_size: usize,
    pub max_connections: usize,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Extra URL parameters, rendered in key order
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Render the transport URL, e.g. `tcp://127.0.0.1:20880?codec=raw`
    pub fn url(&self) -> String {
        let transport = &self.transport;
        let mut url = format!(
            "{}://{}:{}",
            transport.protocol,
            transport.bind_addr.ip(),
            transport.bind_addr.port()
        );

        if !transport.parameters.is_empty() {
            let query: Vec<String> = transport
                .parameters
                .iter()
                .map(|(key, value)| format!("{}={}", key, value))
                .collect();
            url.push('?');
            url.push_str(&query.join("&"));
        }

        url
    }

    /// Look up a URL parameter
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.transport.parameters.get(key).map(String::as_str)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportConfig {
                protocol: "tcp".to_string(),
                bind_addr: SocketAddr::from(([127, 0, 0, 1], 20880)),
                buffer_size: 8192,
                max_connections: 1000,
                shutdown_timeout: Duration::from_secs(30),
                parameters: BTreeMap::new(),
            },
            logging: LoggingConfig::default(),
        }
    }
}
