//! Metrics backend for the `/metrics` endpoint
//!
//! The server only depends on [`MetricsBackend`]. [`PrometheusMetrics`] is the
//! default implementation: it owns a private `prometheus::Registry` instead of
//! registering into the process-global default, so every server instance (and
//! every test) gets its own metric namespace.

mod histogram;

pub use histogram::{MetricsConfig, DEFAULT_HISTOGRAM_BUCKETS, NANOSECOND_HISTOGRAM_BUCKETS};

use crate::config::ServiceInfo;
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("Metric {name} is already registered as a {existing}")]
    KindMismatch { name: String, existing: &'static str },

    #[error("Metrics backend has been shut down")]
    ShutDown,
}

/// Encoded metrics ready to be served over HTTP
#[derive(Debug, Clone)]
pub struct Exposition {
    pub content_type: String,
    pub body: Vec<u8>,
}

/// External metrics backend consumed by the telemetry server
pub trait MetricsBackend: Send + Sync {
    /// Encode the current state of all metrics
    fn render(&self) -> Result<Exposition, MetricsError>;

    /// Flush and release backend resources. Called once when the server stops.
    fn shutdown(&self);
}

#[derive(Clone)]
enum Instrument {
    Counter(IntCounterVec),
    Gauge(GaugeVec),
    Histogram(HistogramVec),
}

impl Instrument {
    fn kind(&self) -> &'static str {
        match self {
            Instrument::Counter(_) => "counter",
            Instrument::Gauge(_) => "gauge",
            Instrument::Histogram(_) => "histogram",
        }
    }
}

/// Prometheus-backed metrics with name-pattern histogram buckets
pub struct PrometheusMetrics {
    registry: Registry,
    config: MetricsConfig,
    instruments: Mutex<HashMap<String, Instrument>>,
    closed: AtomicBool,
}

impl PrometheusMetrics {
    /// Create a backend with its own registry
    ///
    /// Registers `target_info` (labelled with the service identity) and, on
    /// Linux, the process collector.
    pub fn new(service: &ServiceInfo, config: MetricsConfig) -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let target_info = IntGauge::with_opts(
            Opts::new("target_info", "Target metadata")
                .const_label("service_name", service.name.as_str())
                .const_label("service_version", service.version.as_str()),
        )?;
        target_info.set(1);
        registry.register(Box::new(target_info))?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        info!(service = %service.name, "Prometheus metrics registry initialized");

        Ok(Self {
            registry,
            config,
            instruments: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Underlying registry, for registering custom collectors
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Get or create a labelled integer counter
    pub fn counter(
        &self,
        name: &str,
        help: &str,
        labels: &[&str],
    ) -> Result<IntCounterVec, MetricsError> {
        let instrument = self.get_or_register(name, || {
            Ok(Instrument::Counter(IntCounterVec::new(
                Opts::new(name, help),
                labels,
            )?))
        })?;
        match instrument {
            Instrument::Counter(counter) => Ok(counter),
            other => Err(MetricsError::KindMismatch {
                name: name.to_string(),
                existing: other.kind(),
            }),
        }
    }

    /// Get or create a labelled gauge
    pub fn gauge(&self, name: &str, help: &str, labels: &[&str]) -> Result<GaugeVec, MetricsError> {
        let instrument = self.get_or_register(name, || {
            Ok(Instrument::Gauge(GaugeVec::new(Opts::new(name, help), labels)?))
        })?;
        match instrument {
            Instrument::Gauge(gauge) => Ok(gauge),
            other => Err(MetricsError::KindMismatch {
                name: name.to_string(),
                existing: other.kind(),
            }),
        }
    }

    /// Get or create a labelled histogram
    ///
    /// Buckets come from [`MetricsConfig::buckets_for`].
    pub fn histogram(
        &self,
        name: &str,
        help: &str,
        labels: &[&str],
    ) -> Result<HistogramVec, MetricsError> {
        let instrument = self.get_or_register(name, || {
            let opts = HistogramOpts::new(name, help).buckets(self.config.buckets_for(name));
            Ok(Instrument::Histogram(HistogramVec::new(opts, labels)?))
        })?;
        match instrument {
            Instrument::Histogram(histogram) => Ok(histogram),
            other => Err(MetricsError::KindMismatch {
                name: name.to_string(),
                existing: other.kind(),
            }),
        }
    }

    fn get_or_register<F>(&self, name: &str, create: F) -> Result<Instrument, MetricsError>
    where
        F: FnOnce() -> Result<Instrument, MetricsError>,
    {
        let mut instruments = self
            .instruments
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = instruments.get(name) {
            return Ok(existing.clone());
        }

        let instrument = create()?;
        let collector: Box<dyn prometheus::core::Collector> = match &instrument {
            Instrument::Counter(c) => Box::new(c.clone()),
            Instrument::Gauge(g) => Box::new(g.clone()),
            Instrument::Histogram(h) => Box::new(h.clone()),
        };
        self.registry.register(collector)?;
        debug!(metric = name, kind = instrument.kind(), "Registered metric");

        instruments.insert(name.to_string(), instrument.clone());
        Ok(instrument)
    }
}

impl MetricsBackend for PrometheusMetrics {
    fn render(&self) -> Result<Exposition, MetricsError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MetricsError::ShutDown);
        }

        let encoder = TextEncoder::new();
        let mut body = Vec::new();
        encoder.encode(&self.registry.gather(), &mut body)?;

        Ok(Exposition {
            content_type: encoder.format_type().to_string(),
            body,
        })
    }

    fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("Prometheus metrics backend shut down");
        }
    }
}

#[cfg(test)]
#[path = "metrics_test.rs"]
mod tests;
