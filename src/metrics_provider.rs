use std::sync::LazyLock;

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry,
};
use prometheus::{Encoder, HistogramVec, IntCounter, IntCounterVec, Registry, TextEncoder};
use tracing::error;

pub static AUTH_ATTEMPTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec_with_registry!(
        "auth_attempts_total",
        "Total number of authentication attempts",
        &["method", "result"],
        &METRICS_PROVIDER.registry
    )
    .expect("Failed to register auth_attempts metric")
});

pub static SOURCE_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec_with_registry!(
        "identity_source_duration_seconds",
        "Time spent waiting on an external identity source.",
        &["source"],
        &METRICS_PROVIDER.registry
    )
    .expect("Failed to register identity_source_duration metric")
});

pub static METRICS_PROVIDER: LazyLock<MetricsProvider> =
    LazyLock::new(|| MetricsProvider::new().expect("Unable to create metrics provider"));

#[derive(Debug)]
pub enum Error {
    Initialization(String),
    Encoding(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Initialization(err) => write!(f, "Metrics initialization error: {err}"),
            Error::Encoding(err) => write!(f, "Metrics encoding error: {err}"),
        }
    }
}

pub struct MetricsProvider {
    registry: Registry,
    pub metric_http_request_total: IntCounter,
}

impl MetricsProvider {
    pub fn new() -> Result<Self, Error> {
        let registry = Registry::new();

        let metric_http_request_total = register_int_counter_with_registry!(
            "http_requests_total",
            "Total number of HTTP requests made.",
            &registry
        )
        .map_err(|error| {
            error!("Unable to create http_requests_total metric: {error}");
            Error::Initialization(String::from("Unable to create http_requests_total metric"))
        })?;

        Ok(Self {
            registry,
            metric_http_request_total,
        })
    }

    pub fn gather(&self) -> Result<(String, Vec<u8>), Error> {
        let mut buffer = vec![];
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|error| Error::Encoding(format!("Unable to encode metrics: {error}")))?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_attempts_are_exported() {
        AUTH_ATTEMPTS.with_label_values(&["basic", "success"]).inc();

        let (content_type, body) = METRICS_PROVIDER.gather().unwrap();
        let body = String::from_utf8(body).unwrap();

        assert!(content_type.starts_with("text/plain"));
        assert!(body.contains("auth_attempts_total"));
        assert!(body.contains("method=\"basic\""));
    }
}
