//! server::metrics
//!
//! Prometheus metrics for the webhook surface.
//!
//! Metrics are registered against an injected [`Registry`] rather than a
//! process-global one, so tests can build isolated registries and the
//! exposition handler works off the same instance the middleware records
//! into.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

const NAMESPACE: &str = "capstan";
const SUBSYSTEM: &str = "http";

/// Webhook request metrics.
///
/// `Clone` shares the underlying collectors; all types use interior
/// mutability and are safe across threads.
#[derive(Clone)]
pub struct HookMetrics {
    /// Webhook calls received, labeled by response code.
    received: IntCounterVec,

    /// Webhook calls currently being processed.
    inflight: IntGauge,

    /// Response times of webhook calls.
    duration: Histogram,

    registry: Registry,
}

impl HookMetrics {
    /// Create the metric families and register them with `registry`.
    pub fn new(registry: Registry) -> Result<Self, prometheus::Error> {
        let received = IntCounterVec::new(
            Opts::new("hooks_received", "The number of webhook calls received")
                .namespace(NAMESPACE)
                .subsystem(SUBSYSTEM),
            &["code"],
        )?;
        registry.register(Box::new(received.clone()))?;

        let inflight = IntGauge::with_opts(
            Opts::new(
                "hooks_inflight",
                "The number of webhook calls currently being processed",
            )
            .namespace(NAMESPACE)
            .subsystem(SUBSYSTEM),
        )?;
        registry.register(Box::new(inflight.clone()))?;

        let duration = Histogram::with_opts(
            HistogramOpts::new("hooks_duration_seconds", "The response times of webhook calls")
                .namespace(NAMESPACE)
                .subsystem(SUBSYSTEM),
        )?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            received,
            inflight,
            duration,
            registry,
        })
    }

    /// Record the start of a webhook call.
    pub fn call_started(&self) {
        self.inflight.inc();
    }

    /// Record the end of a webhook call with its response code and duration.
    pub fn call_finished(&self, code: &str, seconds: f64) {
        self.inflight.dec();
        self.received.with_label_values(&[code]).inc();
        self.duration.observe(seconds);
    }

    /// Encode all registered families in the text exposition format.
    pub fn encode_text(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        // Encoding into a Vec cannot fail for I/O reasons; an encoder error
        // would mean a malformed family, which registration prevents.
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_exposes_counters() {
        let metrics = HookMetrics::new(Registry::new()).unwrap();
        metrics.call_started();
        metrics.call_finished("200", 0.05);
        let text = metrics.encode_text();
        assert!(text.contains("capstan_http_hooks_received{code=\"200\"} 1"));
        assert!(text.contains("capstan_http_hooks_inflight 0"));
        assert!(text.contains("capstan_http_hooks_duration_seconds_count 1"));
    }

    #[test]
    fn registries_are_isolated() {
        let a = HookMetrics::new(Registry::new()).unwrap();
        let b = HookMetrics::new(Registry::new()).unwrap();
        a.call_started();
        a.call_finished("200", 0.01);
        assert!(!b.encode_text().contains("code=\"200\""));
    }
}
