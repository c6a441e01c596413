//! Logging and metrics bootstrap.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global subscriber. `RUST_LOG` overrides the default `info` filter.
///
/// # Errors
///
/// Fails if a global subscriber is already set.
pub fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).try_init()?;
    } else {
        registry.with(fmt::layer()).try_init()?;
    }
    Ok(())
}

/// Starts the Prometheus scrape listener on `addr` and describes the
/// metrics this crate records.
///
/// # Errors
///
/// Fails if the recorder is already installed or the listener cannot bind.
pub fn install_metrics_exporter(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe_metrics();
    info!(addr = %addr, "metrics exporter listening");
    Ok(())
}

fn describe_metrics() {
    metrics::describe_counter!(
        "courier_consumer_messages_total",
        "Consumed messages by outcome (success, failure)"
    );
    metrics::describe_counter!(
        "courier_producer_messages_total",
        "Publish attempts by outcome (success, failure)"
    );
    metrics::describe_histogram!(
        "courier_consumer_message_latency_seconds",
        metrics::Unit::Seconds,
        "Time between the broker timestamp and consumption"
    );
}
