//! Introspection worker: consumes introspection requests from Kafka and
//! inspects the requested repositories.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use courier_core::TopicTranslation;
use courier_server::broker::{self, KafkaConsumer};
use courier_server::config::BrokerConfig;
use courier_server::event::{self, HttpIntrospector, IntrospectHandler};
use courier_server::network::{listen_for_signals, serve_probes, ProbeState, ShutdownController};
use courier_server::telemetry;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "kafka-introspect", about = "Consume introspection requests and introspect repositories")]
struct Cli {
    #[command(flatten)]
    broker: BrokerConfig,

    /// Emit logs as JSON lines.
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Prometheus scrape listener address; disabled when unset.
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,

    /// Health probe listener address; disabled when unset.
    #[arg(long, env = "PROBE_ADDR")]
    probe_addr: Option<SocketAddr>,

    #[arg(long, env = "INTROSPECT_TIMEOUT_SECS", default_value_t = 30)]
    introspect_timeout_secs: u64,

    /// How long to wait for the in-flight message after shutdown.
    #[arg(long, env = "DRAIN_TIMEOUT_SECS", default_value_t = 30)]
    drain_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing(cli.log_json)?;
    if let Some(addr) = cli.metrics_addr {
        telemetry::install_metrics_exporter(addr)?;
    }

    let shutdown = Arc::new(ShutdownController::new());
    // Registered before anything slow so an early signal is not lost.
    let signals = listen_for_signals(Arc::clone(&shutdown));

    let probes = cli
        .probe_addr
        .map(|addr| tokio::spawn(serve_probes(addr, ProbeState::new(Arc::clone(&shutdown)))));

    let translation = Arc::new(TopicTranslation::from_env().context("failed to load topic mapping")?);
    info!(mappings = translation.len(), "topic translation ready");

    let consumer = KafkaConsumer::new(&cli.broker)?;
    if let Err(err) = broker::ping(cli.broker.request_timeout(), &[&consumer]).await {
        warn!(error = %err, "broker not reachable yet; the consumer will keep retrying");
    }

    let introspector = HttpIntrospector::new(Duration::from_secs(cli.introspect_timeout_secs))?;
    let handler = Arc::new(IntrospectHandler::new(introspector));
    let mut consumer_loop = event::start(consumer, &cli.broker, translation, handler).await?;

    let stats = consumer_loop.run(&shutdown).await;
    info!(
        received = stats.received,
        dispatched = stats.dispatched,
        failed = stats.failed,
        poll_errors = stats.poll_errors,
        "consumer finished"
    );

    if !shutdown
        .wait_for_drain(Duration::from_secs(cli.drain_timeout_secs))
        .await
    {
        warn!(in_flight = shutdown.in_flight_count(), "drain timed out");
    }
    signals.abort();

    if let Some(probes) = probes {
        match probes.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(error = %err, "probe server failed"),
            Err(err) => error!(error = %err, "probe server task panicked"),
        }
    }
    Ok(())
}
