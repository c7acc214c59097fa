//! RustChannel - connection lifecycle bridge demo server
//!
//! Runs the TCP transport with an echo protocol handler and a listener that
//! logs every lifecycle transition.

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rustchannel::{
    bridge::EventContext, config::ConfigManager, AddressIndex, Channel, ChannelHandler,
    ChannelRegistry, LifecycleBridge, LifecycleListener, ListenerSet, RawConnection,
    ShutdownCoordinator, TcpTransport,
};

/// CLI arguments for RustChannel
#[derive(Parser, Debug)]
#[command(name = "rustchannel")]
#[command(about = "RustChannel - connection lifecycle bridge demo server")]
#[command(version)]
#[command(long_about = "
RustChannel - connection lifecycle bridge demo server

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  RUSTCHANNEL_BIND_ADDR         - Bind address (e.g., 127.0.0.1:20880)
  RUSTCHANNEL_BUFFER_SIZE       - Read buffer size in bytes
  RUSTCHANNEL_MAX_CONNECTIONS   - Maximum concurrent connections
  RUSTCHANNEL_SHUTDOWN_TIMEOUT  - Shutdown drain timeout (e.g., 30s)
  RUSTCHANNEL_LOG_LEVEL         - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml", help = "Path to configuration file")]
    pub config: PathBuf,

    /// Bind address (overrides config file)
    #[arg(short, long, help = "Bind address (e.g., 127.0.0.1:20880)")]
    pub bind: Option<String>,

    /// Port to bind to (overrides config file)
    #[arg(short, long, help = "Port to bind to")]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, help = "Log level")]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Maximum number of concurrent connections
    #[arg(long, help = "Maximum number of concurrent connections")]
    pub max_connections: Option<usize>,

    /// Buffer size in bytes
    #[arg(long, help = "Read buffer size in bytes")]
    pub buffer_size: Option<usize>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

/// Writes every inbound chunk back to the peer
struct EchoHandler;

impl ChannelHandler for EchoHandler {
    fn connected(&self, channel: &Arc<Channel>) -> Result<()> {
        channel.set_attribute("protocol", "echo");
        Ok(())
    }

    fn disconnected(&self, channel: &Arc<Channel>) -> Result<()> {
        info!("Echo session on {} ended after {:?}", channel, channel.age());
        Ok(())
    }

    fn received(&self, channel: &Arc<Channel>, data: Bytes) -> Result<()> {
        channel.send(data)
    }
}

/// Logs each lifecycle transition with the peer address
struct ConnectionLogListener;

impl LifecycleListener for ConnectionLogListener {
    fn name(&self) -> &str {
        "connection-log"
    }

    fn on_connect(&self, ctx: &EventContext<'_>) -> Result<()> {
        info!("Peer {} connected", remote_of(ctx));
        Ok(())
    }

    fn on_disconnect(&self, ctx: &EventContext<'_>) -> Result<()> {
        info!("Peer {} disconnected", remote_of(ctx));
        Ok(())
    }
}

fn remote_of(ctx: &EventContext<'_>) -> String {
    ctx.connection
        .remote_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| ctx.connection.id().to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        ConfigManager::load_from_env()?
    };

    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }

    init_tracing(&args, &config.logging.level)?;

    info!("Starting RustChannel v{}", env!("CARGO_PKG_VERSION"));

    config.merge_with_cli_args(
        args.bind.as_deref(),
        args.port,
        args.max_connections,
        args.buffer_size,
    );

    config
        .validate()
        .context("Final configuration validation failed")?;

    if args.validate_config {
        info!("Configuration is valid");
        info!("  URL: {}", config.url());
        info!("  Max connections: {}", config.transport.max_connections);
        info!("  Buffer size: {} bytes", config.transport.buffer_size);
        info!("  Shutdown timeout: {:?}", config.transport.shutdown_timeout);
        return Ok(());
    }

    let config = Arc::new(config);
    let shutdown_coordinator = ShutdownCoordinator::new(config.transport.shutdown_timeout);

    let listeners = ListenerSet::builder()
        .with(Arc::new(ConnectionLogListener))
        .build();

    let bridge = Arc::new(LifecycleBridge::new(
        Arc::new(ChannelRegistry::new()),
        Arc::new(AddressIndex::new()),
        Arc::clone(&config),
        Arc::new(EchoHandler),
        listeners,
    ));

    let transport = Arc::new(TcpTransport::bind(bridge).await?);
    info!("RustChannel listening on {}", transport.local_addr()?);

    let server_handle = {
        let transport = Arc::clone(&transport);
        let shutdown = shutdown_coordinator.sender();
        tokio::spawn(async move {
            if let Err(e) = transport.run(shutdown).await {
                error!("Server error: {:#}", e);
            }
        })
    };

    if let Err(e) = shutdown_coordinator.listen_for_signals().await {
        error!("Error setting up signal handlers: {}", e);
        shutdown_coordinator.trigger();
    }

    if let Err(e) = server_handle.await {
        if !e.is_cancelled() {
            error!("Server task failed: {}", e);
        }
    }

    shutdown_coordinator.wait_for_connections(&transport).await;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs, level: &str) -> Result<()> {
    let log_level = if args.verbose { "debug" } else { level };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
