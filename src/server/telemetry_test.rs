//! Tests for the telemetry server lifecycle

use super::test_support::{wait_for_server, RecordingEscalation};
use super::*;
use crate::config::{ConfigError, ServerConfig, ServiceInfo};
use crate::metrics::{MetricsBackend, MetricsConfig, PrometheusMetrics};
use std::sync::Arc;
use std::time::Duration;

fn test_config(timeout_ms: u64, poll_ms: u64) -> ServerConfig {
    ServerConfig {
        listen_address: "127.0.0.1:0".to_string(),
        readiness_timeout: Duration::from_millis(timeout_ms),
        readiness_poll_interval: Duration::from_millis(poll_ms),
    }
}

fn build(config: ServerConfig, escalation: Arc<RecordingEscalation>) -> TelemetryServer {
    TelemetryServer::builder(ServiceInfo::new("test-service", "1.0.0"))
        .config(config)
        .escalation(escalation)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_new_server_not_started() {
    let server = build(test_config(5000, 100), RecordingEscalation::new());

    assert_eq!(server.state().await, Lifecycle::NotStarted);
    assert!(!server.is_running());
    assert!(!server.is_readiness_enabled());
    assert_eq!(server.bound_address(), None);
    assert_eq!(server.bound_port(), 0);
}

#[tokio::test]
async fn test_start_resolves_bound_port() {
    let server = build(test_config(5000, 100), RecordingEscalation::new());
    server.start().await.unwrap();

    assert_eq!(server.state().await, Lifecycle::Running);
    assert!(server.is_running());
    assert_ne!(server.bound_port(), 0);
    assert_eq!(
        server.bound_address().map(|a| a.port()),
        Some(server.bound_port())
    );

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_double_start_is_noop() {
    let server = build(test_config(5000, 100), RecordingEscalation::new());
    server.start().await.unwrap();
    let port = server.bound_port();

    server.start().await.unwrap();
    server.start_with_address("127.0.0.1:0").await.unwrap();

    assert_eq!(server.bound_port(), port, "second start must not rebind");
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_start_binds_once() {
    let server = Arc::new(build(test_config(5000, 100), RecordingEscalation::new()));

    let starts: Vec<_> = (0..8)
        .map(|_| {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.start().await.map(|()| server.bound_port()) })
        })
        .collect();

    let mut ports = Vec::new();
    for start in starts {
        ports.push(start.await.unwrap().unwrap());
    }
    ports.dedup();
    assert_eq!(ports.len(), 1, "every caller should observe the same bind");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_before_start_is_noop() {
    let server = build(test_config(5000, 100), RecordingEscalation::new());
    server.stop().await.unwrap();
    assert_eq!(server.state().await, Lifecycle::NotStarted);
}

#[tokio::test]
async fn test_double_stop_is_noop() {
    let server = build(test_config(5000, 100), RecordingEscalation::new());
    server.start().await.unwrap();

    server.stop().await.unwrap();
    server.stop().await.unwrap();

    assert_eq!(server.state().await, Lifecycle::Stopped);
    assert!(!server.is_running());
}

#[tokio::test]
async fn test_start_after_stop_is_rejected() {
    let server = build(test_config(5000, 100), RecordingEscalation::new());
    server.start().await.unwrap();
    server.stop().await.unwrap();

    let err = server.start().await.unwrap_err();
    assert!(matches!(err, ServerError::Stopped));
    assert_eq!(server.state().await, Lifecycle::Stopped);
}

/// A failed bind leaves the server startable
#[tokio::test]
async fn test_invalid_address_keeps_not_started() {
    let server = build(test_config(5000, 100), RecordingEscalation::new());

    let err = server.start_with_address("nonsense").await.unwrap_err();
    assert!(matches!(err, ServerError::InvalidAddress { .. }));
    assert_eq!(server.state().await, Lifecycle::NotStarted);

    server.start().await.unwrap();
    assert_eq!(server.state().await, Lifecycle::Running);
    server.stop().await.unwrap();
}

#[test]
fn test_build_rejects_zero_poll_interval() {
    let result = TelemetryServer::builder(ServiceInfo::new("svc", "1"))
        .config(test_config(1000, 0))
        .build();
    assert!(matches!(result, Err(ServerError::Config(_))));
}

/// Timeouts beyond the representable range fail at build, before any bind
#[test]
fn test_build_rejects_out_of_range_timeout() {
    let mut config = test_config(1000, 50);
    config.readiness_timeout = Duration::MAX;
    let result = TelemetryServer::builder(ServiceInfo::new("svc", "1"))
        .config(config)
        .build();
    assert!(matches!(
        result,
        Err(ServerError::Config(ConfigError::DurationOutOfRange { .. }))
    ));

    let lookup = |key: &str| {
        (key == crate::config::READINESS_TIMEOUT_ENV).then(|| "3000000000000000h".to_string())
    };
    assert!(matches!(
        ServerConfig::from_lookup(lookup),
        Err(ConfigError::InvalidDuration { .. })
    ));
}

#[tokio::test]
async fn test_never_enabled_escalates() {
    let escalation = RecordingEscalation::new();
    let server = build(test_config(300, 50), escalation.clone());
    server.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(700)).await;

    assert_eq!(escalation.count(), 1);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_enabled_in_time_does_not_escalate() {
    let escalation = RecordingEscalation::new();
    let server = build(test_config(1000, 50), escalation.clone());
    server.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    server.enable_readiness();
    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert_eq!(escalation.count(), 0);
    server.stop().await.unwrap();
}

/// Stopping before the deadline cancels the readiness watch
#[tokio::test]
async fn test_stop_before_deadline_does_not_escalate() {
    let escalation = RecordingEscalation::new();
    let server = build(test_config(300, 50), escalation.clone());
    server.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    server.stop().await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(escalation.count(), 0);
}

#[tokio::test]
async fn test_stop_shuts_down_metrics_backend() {
    let metrics = Arc::new(
        PrometheusMetrics::new(&ServiceInfo::new("svc", "1"), MetricsConfig::default()).unwrap(),
    );
    let server = TelemetryServer::builder(ServiceInfo::new("svc", "1"))
        .config(test_config(5000, 100))
        .metrics(metrics.clone())
        .escalation(RecordingEscalation::new())
        .build()
        .unwrap();

    server.start().await.unwrap();
    assert!(metrics.render().is_ok());

    server.stop().await.unwrap();
    assert!(metrics.render().is_err());
}

#[tokio::test]
async fn test_custom_metrics_visible_on_endpoint() {
    let metrics = Arc::new(
        PrometheusMetrics::new(&ServiceInfo::new("svc", "1"), MetricsConfig::default()).unwrap(),
    );
    let counter = metrics
        .counter("orders_total", "Orders placed", &["region"])
        .unwrap();
    let server = TelemetryServer::builder(ServiceInfo::new("svc", "1"))
        .config(test_config(5000, 100))
        .metrics(metrics.clone())
        .escalation(RecordingEscalation::new())
        .build()
        .unwrap();
    server.start().await.unwrap();

    counter.with_label_values(&["eu"]).inc_by(3);

    let body = reqwest::get(format!("http://127.0.0.1:{}/metrics", server.bound_port()))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains(r#"orders_total{region="eu"} 3"#));

    server.stop().await.unwrap();
}

/// End-to-end: a failing check reports unhealthy until re-registered as passing
#[tokio::test]
async fn test_end_to_end_check_replacement() {
    let server = build(test_config(5000, 100), RecordingEscalation::new());
    server.start_with_address(":0").await.unwrap();
    let url = format!("http://127.0.0.1:{}/_hc", server.bound_port());
    let client = wait_for_server(&url, 10).await;

    let response = client.get(&url).send().await.unwrap();
    assert_eq!(response.status(), 503);
    assert_eq!(response.text().await.unwrap(), "not enabled");

    server.register_check("dependency", || Err(anyhow::anyhow!("dependency down")));
    server.enable_readiness();

    let response = client.get(&url).send().await.unwrap();
    assert_eq!(response.status(), 503);
    assert_eq!(response.text().await.unwrap(), "unhealthy");

    server.register_check("dependency", || Ok(()));

    let response = client.get(&url).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "ok");

    drop(client);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_index_reports_service() {
    let server = build(test_config(5000, 100), RecordingEscalation::new());
    server.start().await.unwrap();

    let body: serde_json::Value =
        reqwest::get(format!("http://127.0.0.1:{}/", server.bound_port()))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
    assert_eq!(body["service"], "test-service");
    assert_eq!(body["version"], "1.0.0");
    assert_eq!(body["status"], "running");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_custom_profiling_router() {
    let profiling =
        axum::Router::new().route("/debug/pprof/heap", axum::routing::get(|| async { "heap" }));
    let server = TelemetryServer::builder(ServiceInfo::new("svc", "1"))
        .config(test_config(5000, 100))
        .profiling(profiling)
        .escalation(RecordingEscalation::new())
        .build()
        .unwrap();
    server.start().await.unwrap();

    let body = reqwest::get(format!(
        "http://127.0.0.1:{}/debug/pprof/heap",
        server.bound_port()
    ))
    .await
    .unwrap()
    .text()
    .await
    .unwrap();
    assert_eq!(body, "heap");

    server.stop().await.unwrap();
}
