//! Prometheus exporter for OpenSIPS.
//!
//! Every scrape runs one collection pass against the OpenSIPS `mi_json`
//! interface and renders the result in Prometheus text format.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │    OpenSIPS     │<────│    Collector    │<────│   HTTP Server   │
//! │   (mi_json)     │     │ (catalog+cache) │     │   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! - [`catalog`] - Known OpenSIPS statistics and their metric names
//! - [`matcher`] - Resolution of `subsystem:name` statistics against the catalog
//! - [`cache`] - Commands, processes and dialog profiles discovered per instance
//! - [`collector`] - The collection pass
//! - [`metrics`] - Emissions and text exposition
//!
//! # Usage
//!
//! ```bash
//! opensips-exporter --opensips.url http://127.0.0.1:8062/json
//! opensips-exporter --config config.json5
//! ```
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod cache;
pub mod catalog;
pub mod collector;
pub mod config;
pub mod http;
pub mod mapping;
pub mod matcher;
pub mod metrics;

pub use cache::{CapabilityCache, CapabilitySnapshot, ProcessInfo};
pub use catalog::{CatalogError, StatCatalog};
pub use collector::{Collector, CollectorStats, SharedCollector};
pub use config::{ConfigError, ExporterConfig, LogFormat, LoggingConfig};
pub use http::HttpServer;
pub use matcher::{StatMatcher, parse_stat};
pub use metrics::{Emission, MetricDesc, MetricSet};

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), ConfigError> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| ConfigError::Logging(e.to_string()))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| ConfigError::Logging(e.to_string()))?;
        }
    }

    Ok(())
}
