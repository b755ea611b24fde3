//! `metrics_utils` provides Prometheus instrument factories that share the
//! logging pipeline's service identity.
//!
//! A [`MetricsHandle`] owns a registry whose instruments all carry the
//! service name and deployment environment as constant labels, so metrics
//! join up with logs and spans emitted by the same process. Construct one
//! handle at startup and pass it by reference; instruments are created once
//! and cloned for reuse.
//!
//! Unlike log emission, instrument creation happens at startup where failing
//! fast is correct — factories return [`MetricsError`] instead of swallowing
//! failures.
//!
//! # Example
//!
//! ```
//! use log_correlation::ServiceIdentity;
//! use metrics_utils::MetricsHandle;
//!
//! let identity = ServiceIdentity {
//!     service: "orders".to_string(),
//!     environment: "staging".to_string(),
//!     ..ServiceIdentity::default()
//! };
//! let metrics = MetricsHandle::new(&identity);
//!
//! let requests = metrics
//!     .int_counter_vec("requests_total", "Handled requests", &["route"])
//!     .expect("instrument registration");
//! requests.with_label_values(&["/orders"]).inc();
//! ```

use std::collections::HashMap;

use log_correlation::ServiceIdentity;
use prometheus::{
    Gauge, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};

/// Label under which the service name is attached to every instrument.
const SERVICE_LABEL: &str = "service";

/// Label under which the deployment environment is attached to every
/// instrument.
const ENVIRONMENT_LABEL: &str = "environment";

/// Errors that can occur while creating or rendering instruments.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Represents an error from the Prometheus client, typically a duplicate
    /// or invalid instrument registration.
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// A registry handle labeling every instrument with the process identity.
#[derive(Clone, Debug)]
pub struct MetricsHandle {
    registry: Registry,
    const_labels: HashMap<String, String>,
}

impl MetricsHandle {
    /// Creates a handle whose instruments carry `identity`'s non-empty
    /// service and environment fields as constant labels.
    pub fn new(identity: &ServiceIdentity) -> Self {
        let mut const_labels = HashMap::new();
        if !identity.service.is_empty() {
            const_labels.insert(SERVICE_LABEL.to_string(), identity.service.clone());
        }
        if !identity.environment.is_empty() {
            const_labels.insert(ENVIRONMENT_LABEL.to_string(), identity.environment.clone());
        }
        Self {
            registry: Registry::new(),
            const_labels,
        }
    }

    /// The underlying registry, for integration with exposition endpoints.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Creates and registers a monotonically increasing counter.
    pub fn int_counter(&self, name: &str, help: &str) -> Result<IntCounter, MetricsError> {
        let counter = IntCounter::with_opts(self.opts(name, help))?;
        self.registry.register(Box::new(counter.clone()))?;
        Ok(counter)
    }

    /// Creates and registers a counter partitioned by `labels`.
    pub fn int_counter_vec(
        &self,
        name: &str,
        help: &str,
        labels: &[&str],
    ) -> Result<IntCounterVec, MetricsError> {
        let counter = IntCounterVec::new(self.opts(name, help), labels)?;
        self.registry.register(Box::new(counter.clone()))?;
        Ok(counter)
    }

    /// Creates and registers a gauge.
    pub fn gauge(&self, name: &str, help: &str) -> Result<Gauge, MetricsError> {
        let gauge = Gauge::with_opts(self.opts(name, help))?;
        self.registry.register(Box::new(gauge.clone()))?;
        Ok(gauge)
    }

    /// Creates and registers a histogram with the given bucket boundaries.
    /// An empty `buckets` slice keeps the Prometheus defaults.
    pub fn histogram(
        &self,
        name: &str,
        help: &str,
        buckets: &[f64],
    ) -> Result<Histogram, MetricsError> {
        let histogram = Histogram::with_opts(self.histogram_opts(name, help, buckets))?;
        self.registry.register(Box::new(histogram.clone()))?;
        Ok(histogram)
    }

    /// Creates and registers a histogram partitioned by `labels`.
    pub fn histogram_vec(
        &self,
        name: &str,
        help: &str,
        buckets: &[f64],
        labels: &[&str],
    ) -> Result<HistogramVec, MetricsError> {
        let histogram = HistogramVec::new(self.histogram_opts(name, help, buckets), labels)?;
        self.registry.register(Box::new(histogram.clone()))?;
        Ok(histogram)
    }

    /// Renders the registry in the Prometheus text exposition format.
    pub fn render_text(&self) -> Result<String, MetricsError> {
        Ok(TextEncoder::new().encode_to_string(&self.registry.gather())?)
    }

    fn opts(&self, name: &str, help: &str) -> Opts {
        Opts::new(name, help).const_labels(self.const_labels.clone())
    }

    fn histogram_opts(&self, name: &str, help: &str, buckets: &[f64]) -> HistogramOpts {
        let mut opts = HistogramOpts::new(name, help).const_labels(self.const_labels.clone());
        if !buckets.is_empty() {
            opts = opts.buckets(buckets.to_vec());
        }
        opts
    }
}
