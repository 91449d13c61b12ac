//! CSI Console
//!
//! Dashboard backend for the TrueNAS CSI driver: aggregates the driver's
//! resources, proxies controller metrics, and runs kbench benchmarks.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use csi_console::{
    Aggregator, AggregatorConfig, BenchmarkRunner, Error, KubeApiProxy, Result, RestRouter,
    SettingsStore, DRIVER_PROVISIONER,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// CSI Console - dashboard backend for the TrueNAS CSI driver
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// REST API bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8099")]
    api_addr: String,

    /// Provisioner string identifying the driver
    #[arg(long, env = "DRIVER", default_value = DRIVER_PROVISIONER)]
    driver: String,

    /// Namespace the driver pods run in
    #[arg(long, env = "DRIVER_NAMESPACE", default_value = "kube-system")]
    driver_namespace: String,

    /// Re-list cadence of the resource watchers, in seconds
    #[arg(long, env = "LIST_INTERVAL", default_value = "30")]
    list_interval_secs: u64,

    /// Settings file path
    #[arg(long, env = "SETTINGS_PATH", default_value = "/var/lib/csi-console/settings.yaml")]
    settings_path: String,

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

    init_logging(&args);

    info!("Starting CSI Console");
    info!("  Version: {}", csi_console::VERSION);
    info!("  REST API: {}", args.api_addr);
    info!("  Driver: {}", args.driver);
    info!("  Driver namespace: {}", args.driver_namespace);

    let addr: SocketAddr = args
        .api_addr
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid REST API address: {}", e)))?;

    let client = kube::Client::try_default().await?;
    let proxy = Arc::new(KubeApiProxy::new(client));

    let settings = Arc::new(SettingsStore::open(&args.settings_path)?);

    let config = AggregatorConfig {
        driver: args.driver.clone(),
        driver_namespace: args.driver_namespace.clone(),
        list_interval: Duration::from_secs(args.list_interval_secs),
    };
    let aggregator = Aggregator::new(proxy.clone(), config.clone());
    info!("Aggregator started");

    let runner = BenchmarkRunner::new(proxy.clone());

    let app = RestRouter::new(
        aggregator.clone(),
        runner,
        proxy,
        settings,
        config,
    )
    .build();

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    };
    csi_console::api::serve(addr, app, shutdown).await?;

    aggregator.shutdown();
    info!("Console shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("kube=info".parse().unwrap())
        .add_directive("tower=warn".parse().unwrap());

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
}
