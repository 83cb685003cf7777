//! EBS Gateway
//!
//! Block storage control plane for RADOS/RBD clusters. Serves pool and volume
//! administration over HTTP (`GET /?Action=...`).

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ebs_gateway::{
    ApiServer, ApiServerConfig, BackendFactory, BackendKind, Error, Orchestrator, Result,
    ServiceConfig,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// EBS Gateway - block storage control plane for RADOS/RBD
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "EBS_CONFIG")]
    config: Option<PathBuf>,

    /// REST API bind address (overrides the configuration file)
    #[arg(long, env = "EBS_LISTEN_ADDR")]
    listen_addr: Option<String>,

    /// Run against the in-process simulated cluster
    #[arg(long, env = "EBS_STANDALONE")]
    standalone: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    let config = load_config(&args)?;

    info!("Starting EBS Gateway");
    info!("  Version: {}", ebs_gateway::VERSION);
    info!("  REST API: {}", config.api.listen_addr);
    info!("  Backend: {:?}", config.backend);
    info!("  Store: {:?}", config.store.kind);
    info!("  Map timeout: {:?}", config.device.map_timeout);

    let backends = BackendFactory::create(&config).await?;
    let orchestrator = Orchestrator::new(
        config.orchestrator(),
        backends.client,
        backends.mapper,
        backends.store,
    );

    let api_config = ApiServerConfig {
        rest_addr: config.api.listen_addr,
    };
    let server = Arc::new(ApiServer::new(api_config, orchestrator)?);

    let signal_server = server.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received"),
            Err(e) => error!("Failed to listen for interrupt: {}", e),
        }
        signal_server.shutdown();
    });

    server.run().await?;

    info!("Gateway shutdown complete");
    Ok(())
}

// =============================================================================
// Configuration
// =============================================================================

fn load_config(args: &Args) -> Result<ServiceConfig> {
    let mut config = match &args.config {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::default(),
    };

    if let Some(addr) = &args.listen_addr {
        config.api.listen_addr = addr.parse::<SocketAddr>().map_err(|e| {
            Error::Configuration(format!("Invalid REST API address {}: {}", addr, e))
        })?;
    }
    if args.standalone {
        config.backend = BackendKind::Standalone;
    }

    config.validate()?;
    Ok(config)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "tower=warn", "tower_http=info", "axum=info"] {
        filter = filter.add_directive(
            directive
                .parse()
                .map_err(|e| Error::Configuration(format!("log directive {}: {}", directive, e)))?,
        );
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }

    Ok(())
}
