//! Configuration Manager

use super::Config;
use crate::Result;
use anyhow::{Context, bail};
use std::net::SocketAddr;
use std::path::Path;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config.validate()
                .with_context(|| "Configuration validation failed")?;

            tracing::info!("Configuration loaded and validated successfully");
            Ok(config)
        } else {
            tracing::warn!("Configuration file not found at {}, using defaults", path.display());
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();

        if let Ok(bind_addr) = std::env::var("RUSTCHANNEL_BIND_ADDR") {
            config.transport.bind_addr = bind_addr.parse::<SocketAddr>()
                .with_context(|| format!("Invalid RUSTCHANNEL_BIND_ADDR: {}", bind_addr))?;
        }

        if let Ok(buffer_size) = std::env::var("RUSTCHANNEL_BUFFER_SIZE") {
            config.transport.buffer_size = buffer_size.parse::<usize>()
                .with_context(|| format!("Invalid RUSTCHANNEL_BUFFER_SIZE: {}", buffer_size))?;
        }

        if let Ok(max_conn) = std::env::var("RUSTCHANNEL_MAX_CONNECTIONS") {
            config.transport.max_connections = max_conn.parse::<usize>()
                .with_context(|| format!("Invalid RUSTCHANNEL_MAX_CONNECTIONS: {}", max_conn))?;
        }

        if let Ok(timeout) = std::env::var("RUSTCHANNEL_SHUTDOWN_TIMEOUT") {
            config.transport.shutdown_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid RUSTCHANNEL_SHUTDOWN_TIMEOUT: {}", timeout))?;
        }

        if let Ok(log_level) = std::env::var("RUSTCHANNEL_LOG_LEVEL") {
            config.logging.level = log_level;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_transport_config()
            .with_context(|| "Transport configuration validation failed")?;

        self.validate_logging_config()
            .with_context(|| "Logging configuration validation failed")?;

        Ok(())
    }

    fn validate_transport_config(&self) -> Result<()> {
        if self.transport.protocol != "tcp" {
            bail!("transport.protocol must be 'tcp'");
        }

        if self.transport.max_connections == 0 {
            bail!("max_connections must be greater than 0");
        }

        if self.transport.max_connections > 100000 {
            bail!("max_connections cannot exceed 100,000 for safety");
        }

        if self.transport.buffer_size < 1024 {
            bail!("buffer_size must be at least 1024 bytes");
        }

        if self.transport.buffer_size > 1048576 {
            bail!("buffer_size cannot exceed 1MB");
        }

        for key in self.transport.parameters.keys() {
            if key.is_empty() || key.contains(['&', '=', '?']) {
                bail!("Invalid URL parameter name: '{}'", key);
            }
        }

        Ok(())
    }

    fn validate_logging_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.as_str()) {
            bail!("logging.level must be one of: {}", valid_log_levels.join(", "));
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        bind: Option<&str>,
        port: Option<u16>,
        max_connections: Option<usize>,
        buffer_size: Option<usize>,
    ) {
        if let Some(bind_str) = bind {
            if let Ok(addr) = bind_str.parse::<SocketAddr>() {
                self.transport.bind_addr = addr;
                tracing::info!("CLI override: bind address set to {}", addr);
            } else {
                tracing::warn!("Invalid bind address provided: {}", bind_str);
            }
        }

        if let Some(port) = port {
            self.transport.bind_addr.set_port(port);
            tracing::info!("CLI override: port set to {}", port);
        }

        if let Some(max_conn) = max_connections {
            self.transport.max_connections = max_conn;
            tracing::info!("CLI override: max connections set to {}", max_conn);
        }

        if let Some(buffer_size) = buffer_size {
            self.transport.buffer_size = buffer_size;
            tracing::info!("CLI override: buffer size set to {} bytes", buffer_size);
        }
    }
}
