//! Prometheus exporter for OpenSIPS.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use opensips_mi::MiJsonClient;
use tokio::sync::watch;
use tracing::{error, info};

use opensips_exporter::{Collector, ExporterConfig, HttpServer, StatCatalog, init_tracing};

/// Prometheus exporter for OpenSIPS.
#[derive(Parser, Debug)]
#[command(name = "opensips-exporter")]
#[command(about = "Export OpenSIPS statistics as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// The HTTP address of the OpenSIPS mi_json interface (overrides config).
    #[arg(long = "opensips.url")]
    opensips_url: Option<String>,

    /// The address to listen on for HTTP requests (overrides config).
    #[arg(long = "web.listen-address")]
    listen_address: Option<String>,

    /// Log level: trace, debug, info, warn, error (overrides config).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path)?
    } else {
        ExporterConfig::default()
    };

    if let Some(url) = args.opensips_url {
        config.opensips.url = url;
    }
    if let Some(listen) = args.listen_address {
        config.prometheus.listen = listen;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    init_tracing(&config.logging)?;

    info!("Starting OpenSIPS Prometheus Exporter");

    let catalog = Arc::new(StatCatalog::builtin()?);
    let client = MiJsonClient::new(&config.opensips.url, config.opensips.timeout())?;
    let collector = Arc::new(Collector::new(client, catalog));

    info!(
        url = %config.opensips.url,
        timeout_secs = config.opensips.timeout_secs,
        metrics = collector.descriptors().count(),
        "Collector ready"
    );

    let listen_addr: SocketAddr = config
        .prometheus
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_server = HttpServer::new(
        collector.clone(),
        listen_addr,
        config.prometheus.path.clone(),
    );
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(shutdown_rx).await {
            error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    shutdown_tx.send(true)?;

    let _ = tokio::time::timeout(Duration::from_secs(5), http_task).await;

    let stats = collector.stats();
    info!(
        collections = stats.collections,
        failures = stats.failures,
        stats_matched = stats.stats_matched,
        stats_skipped = stats.stats_skipped,
        "Final statistics"
    );

    info!("Exporter stopped");
    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
