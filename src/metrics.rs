//! Ambient Prometheus metrics, gated behind the `metrics` feature (on by
//! default, matching the teacher's `Cargo.toml` feature layout).
//!
//! Grounded in the teacher's dependency on `prometheus`, though the
//! teacher's pack never retrieved a `metrics.rs` of its own to adapt
//! line-by-line; the collector set below follows the teacher's
//! `lazy_static! { ... }` registration idiom seen in its test fixtures and
//! `client/middleware.rs`'s counters-around-a-future shape.

#[cfg(feature = "metrics")]
mod imp {
    use prometheus::{CounterVec, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, Opts, Registry};

    use errors::ResultExt;

    lazy_static! {
        static ref REQUESTS_TOTAL: CounterVec = CounterVec::new(
            Opts::new("kafka_broker_core_requests_total", "Requests sent per API key and outcome"),
            &["api_key", "outcome"],
        ).unwrap();

        static ref REQUEST_LATENCY_SECONDS: HistogramVec = HistogramVec::new(
            HistogramOpts::new("kafka_broker_core_request_latency_seconds", "Request round-trip latency"),
            &["api_key"],
        ).unwrap();

        static ref CONNECTIONS_OPEN: Gauge = Gauge::with_opts(
            Opts::new("kafka_broker_core_connections_open", "Connections currently open, process-wide")
        ).unwrap();

        static ref IN_FLIGHT_REQUESTS: GaugeVec = GaugeVec::new(
            Opts::new("kafka_broker_core_in_flight_requests", "In-flight requests per broker"),
            &["broker"],
        ).unwrap();
    }

    /// Registers this crate's collectors with `registry`. Safe to call more
    /// than once per process only if each call uses a distinct `Registry`;
    /// registering the same collector twice on one registry is a
    /// `prometheus` error the caller must handle, matching how the crate
    /// treats any other collaborator failure.
    pub fn register(registry: &Registry) -> ::errors::Result<()> {
        registry.register(Box::new(REQUESTS_TOTAL.clone())).chain_err(|| "failed to register requests_total")?;
        registry.register(Box::new(REQUEST_LATENCY_SECONDS.clone())).chain_err(|| "failed to register request_latency_seconds")?;
        registry.register(Box::new(CONNECTIONS_OPEN.clone())).chain_err(|| "failed to register connections_open")?;
        registry.register(Box::new(IN_FLIGHT_REQUESTS.clone())).chain_err(|| "failed to register in_flight_requests")?;

        Ok(())
    }

    pub fn record_request(api_key: i16, outcome: &str, elapsed_secs: f64) {
        REQUESTS_TOTAL.with_label_values(&[&api_key.to_string(), outcome]).inc();
        REQUEST_LATENCY_SECONDS.with_label_values(&[&api_key.to_string()]).observe(elapsed_secs);
    }

    pub fn record_connections_open(count: usize) {
        CONNECTIONS_OPEN.set(count as f64);
    }

    pub fn record_in_flight(broker: &str, count: usize) {
        IN_FLIGHT_REQUESTS.with_label_values(&[broker]).set(count as f64);
    }
}

#[cfg(not(feature = "metrics"))]
mod imp {
    pub fn record_request(_api_key: i16, _outcome: &str, _elapsed_secs: f64) {}

    pub fn record_connections_open(_count: usize) {}

    pub fn record_in_flight(_broker: &str, _count: usize) {}
}

pub use self::imp::*;

/// Outcome label recorded alongside a request's latency.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    KafkaError,
    Retriable,
    Fatal,
}

impl Outcome {
    fn as_str(&self) -> &'static str {
        match *self {
            Outcome::Ok => "ok",
            Outcome::KafkaError => "kafka_error",
            Outcome::Retriable => "retriable",
            Outcome::Fatal => "fatal",
        }
    }
}

/// Convenience wrapper over `record_request` taking the typed `Outcome`
/// enum instead of a bare label string, so call sites in `connection`/
/// `broker` can't typo a label.
pub fn observe_request(api_key: ::ids::ApiKey, outcome: Outcome, elapsed_secs: f64) {
    record_request(api_key, outcome.as_str(), elapsed_secs);
}
