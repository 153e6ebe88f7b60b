use std::sync::Arc;
use std::time::Duration;
use telemetry_sidecar::config::{ServerConfig, ServiceInfo};
use telemetry_sidecar::metrics::{MetricsConfig, PrometheusMetrics};
use telemetry_sidecar::server::wait_for_termination;
use telemetry_sidecar::TelemetryServer;
use tracing::{error, info};

/// Simulated startup work before the application declares itself ready
const WARMUP: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let service = ServiceInfo::from_env();
    info!(service = %service.name, version = %service.version, "Starting telemetry sidecar demo");

    let metrics = Arc::new(PrometheusMetrics::new(&service, MetricsConfig::default())?);
    let checks_run = metrics.counter(
        "demo_health_checks_total",
        "Health checks evaluated by the demo",
        &["check"],
    )?;

    let server = TelemetryServer::builder(service)
        .config(config)
        .metrics(metrics.clone())
        .build()?;

    for check in ["database", "cache"] {
        let counter = checks_run.with_label_values(&[check]);
        server.register_check(check, move || {
            counter.inc();
            Ok(())
        });
    }

    server.start().await?;
    info!(
        address = ?server.bound_address(),
        "Telemetry endpoints available"
    );

    // Application initialization happens here
    tokio::time::sleep(WARMUP).await;
    server.enable_readiness();
    info!("Application ready");

    match wait_for_termination().await {
        Ok(signal) => info!(signal = signal, "Initiating graceful shutdown"),
        Err(e) => error!(error = %e, "Failed to wait for termination signal, shutting down"),
    }

    if let Err(e) = server.stop().await {
        error!(error = %e, "Error during shutdown");
        return Err(e.into());
    }

    info!("Telemetry sidecar demo shut down gracefully");
    Ok(())
}
