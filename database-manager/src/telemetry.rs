// Telemetry: structured logging and Prometheus metrics for the pool layer

use anyhow::Result;
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize logging.
///
/// `RUST_LOG` wins over `log_level` when set. With `json` the output is one
/// JSON object per line including the current span; otherwise human-readable.
pub fn init_logging(log_level: &str, json: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let layer = if json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    tracing::info!(log_level = log_level, json = json, "Logging initialized");
    Ok(())
}

/// Install the Prometheus exporter on `0.0.0.0:<port>` and describe pool metrics
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_metrics();

    tracing::info!(
        metrics_port = metrics_port,
        metrics_endpoint = format!("http://0.0.0.0:{}/metrics", metrics_port),
        "Prometheus metrics exporter initialized"
    );
    Ok(())
}

fn describe_metrics() {
    describe_gauge!("db_pool_leases", "Connections currently leased, per database");
    describe_gauge!(
        "db_pool_connections",
        "Physical connections held by the pool (idle + leased), per database"
    );
    describe_counter!(
        "db_pool_acquire_timeouts_total",
        "Acquire calls that gave up because the pool stayed saturated"
    );
    describe_histogram!(
        "db_pool_acquire_wait_seconds",
        "Time spent waiting for a free pool slot"
    );
    describe_counter!(
        "db_pool_connect_failures_total",
        "Failed attempts to open a new database connection"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_twice_fails_the_second_time() {
        // the first call may already fail if another test installed a subscriber
        let _ = init_logging("info", true);
        assert!(init_logging("info", true).is_err());
    }

    #[test]
    fn test_describe_metrics_without_recorder() {
        describe_metrics();
    }
}
