//! Prometheus metrics for the consumer session
//!
//! Every metric is labelled by the target service name so several sessions
//! in one process stay distinguishable.

use std::time::Duration;

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, Encoder,
    HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder,
};

const LABEL_SERVICE: &str = "service";
const LABEL_DOMAIN: &str = "domain";
const LABEL_CLASS: &str = "class";
const LABEL_KIND: &str = "kind";

/// Messages received per domain and message class
static MESSAGES_RECEIVED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "eta_consumer_messages_received_total",
        "Messages received from the provider",
        &[LABEL_SERVICE, LABEL_DOMAIN, LABEL_CLASS]
    )
    .expect("Failed to register messages_received metric")
});

static MESSAGES_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "eta_consumer_messages_sent_total",
        "Messages written to the channel",
        &[LABEL_SERVICE, LABEL_DOMAIN, LABEL_CLASS]
    )
    .expect("Failed to register messages_sent metric")
});

static PINGS_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "eta_consumer_pings_sent_total",
        "Heartbeats sent to the provider",
        &[LABEL_SERVICE]
    )
    .expect("Failed to register pings_sent metric")
});

static PINGS_RECEIVED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "eta_consumer_pings_received_total",
        "Heartbeats received from the provider",
        &[LABEL_SERVICE]
    )
    .expect("Failed to register pings_received metric")
});

/// Session state as the ordinal of `SessionState`
static SESSION_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "eta_consumer_session_state",
        "Current session state (0=connecting .. 7=closed)",
        &[LABEL_SERVICE]
    )
    .expect("Failed to register session_state metric")
});

static FLUSH_PENDING: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "eta_consumer_flush_pending",
        "Whether queued output is waiting for a flush (1=pending)",
        &[LABEL_SERVICE]
    )
    .expect("Failed to register flush_pending metric")
});

static FATAL_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "eta_consumer_fatal_errors_total",
        "Conditions that ended a session",
        &[LABEL_SERVICE, LABEL_KIND]
    )
    .expect("Failed to register fatal_errors metric")
});

/// Decode plus stage dispatch time of one inbound message
static DISPATCH_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "eta_consumer_dispatch_seconds",
        "Time to decode and dispatch one inbound message",
        &[LABEL_SERVICE, LABEL_DOMAIN],
        vec![0.000_001, 0.000_005, 0.000_025, 0.000_1, 0.000_5, 0.002, 0.01]
    )
    .expect("Failed to register dispatch_seconds metric")
});

/// Handle for recording metrics of one session
#[derive(Clone)]
pub struct SessionMetrics {
    service: String,
}

impl SessionMetrics {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn inc_received(&self, domain: &str, class: &str) {
        MESSAGES_RECEIVED
            .with_label_values(&[&self.service, domain, class])
            .inc();
    }

    pub fn inc_sent(&self, domain: &str, class: &str) {
        MESSAGES_SENT
            .with_label_values(&[&self.service, domain, class])
            .inc();
    }

    pub fn inc_ping_sent(&self) {
        PINGS_SENT.with_label_values(&[&self.service]).inc();
    }

    pub fn inc_ping_received(&self) {
        PINGS_RECEIVED.with_label_values(&[&self.service]).inc();
    }

    pub fn set_state(&self, ordinal: i64) {
        SESSION_STATE.with_label_values(&[&self.service]).set(ordinal);
    }

    pub fn set_flush_pending(&self, pending: bool) {
        FLUSH_PENDING
            .with_label_values(&[&self.service])
            .set(i64::from(pending));
    }

    pub fn inc_fatal(&self, kind: &str) {
        FATAL_ERRORS.with_label_values(&[&self.service, kind]).inc();
    }

    pub fn observe_dispatch(&self, domain: &str, elapsed: Duration) {
        DISPATCH_SECONDS
            .with_label_values(&[&self.service, domain])
            .observe(elapsed.as_secs_f64());
    }

    pub fn get_messages_received(&self, domain: &str, class: &str) -> u64 {
        MESSAGES_RECEIVED
            .with_label_values(&[&self.service, domain, class])
            .get()
    }

    pub fn get_state(&self) -> i64 {
        SESSION_STATE.with_label_values(&[&self.service]).get()
    }
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to encode metrics as UTF-8: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_metrics_counts() {
        let metrics = SessionMetrics::new("metrics_test_counts");
        metrics.inc_received("login", "refresh");
        metrics.inc_received("login", "refresh");
        metrics.inc_sent("login", "request");
        assert_eq!(metrics.get_messages_received("login", "refresh"), 2);
        assert_eq!(metrics.get_messages_received("source", "refresh"), 0);
    }

    #[test]
    fn test_session_state_gauge() {
        let metrics = SessionMetrics::new("metrics_test_state");
        metrics.set_state(5);
        assert_eq!(metrics.get_state(), 5);
    }

    #[test]
    fn test_encode_metrics() {
        let metrics = SessionMetrics::new("metrics_test_encode");
        metrics.inc_ping_sent();
        metrics.inc_fatal("ping_timeout");
        metrics.observe_dispatch("market_price", Duration::from_micros(3));

        let output = encode_metrics().unwrap();
        assert!(output.contains("eta_consumer_pings_sent_total"));
        assert!(output.contains("eta_consumer_fatal_errors_total"));
        assert!(output.contains("metrics_test_encode"));
    }
}
