//! Client metrics
//!
//! OpenTelemetry instruments recorded by the transport and the client when
//! metrics are enabled through [`ClientBuilder::with_metrics`]. They go
//! through the global meter provider, so nothing is exported unless the
//! application installed one (see `tether_core::init_observability`).
//!
//! # Metrics Collected
//!
//! - **tether.client.connection.state**: current state (gauge; -1=destroyed,
//!   0=closed, 1=connecting, 2=open)
//! - **tether.client.calls.total** / **tether.client.calls.duration**: one-shot
//!   calls by method and outcome
//! - **tether.client.stream.pushes**: stream values delivered
//! - **tether.client.errors.total**: errors by kind
//! - **tether.client.reconnection.attempts** / **.success**
//! - **tether.client.sends.deferred** / **tether.client.sends.timeouts**
//!
//! [`ClientBuilder::with_metrics`]: crate::ClientBuilder::with_metrics

use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, Meter},
    KeyValue,
};

/// Instruments for one client
pub struct ClientMetrics {
    pub connection_state: Gauge<i64>,
    pub calls_total: Counter<u64>,
    /// Seconds from issuing a call to its outcome
    pub call_duration: Histogram<f64>,
    pub stream_pushes: Counter<u64>,
    pub errors_total: Counter<u64>,
    pub reconnection_attempts: Counter<u64>,
    pub reconnection_success: Counter<u64>,
    pub deferred_sends: Counter<u64>,
    pub send_timeouts: Counter<u64>,
}

impl ClientMetrics {
    pub fn new(service_name: impl Into<String>) -> Self {
        let meter = global::meter_with_scope(
            opentelemetry::InstrumentationScope::builder(service_name.into()).build(),
        );
        Self::new_with_meter(&meter)
    }

    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            connection_state: meter
                .i64_gauge("tether.client.connection.state")
                .with_description("Connection state (-1=destroyed, 0=closed, 1=connecting, 2=open)")
                .build(),
            calls_total: meter
                .u64_counter("tether.client.calls.total")
                .with_description("One-shot calls completed, by method and status")
                .build(),
            call_duration: meter
                .f64_histogram("tether.client.calls.duration")
                .with_description("Call duration in seconds")
                .with_unit("s")
                .build(),
            stream_pushes: meter
                .u64_counter("tether.client.stream.pushes")
                .with_description("Stream values received")
                .build(),
            errors_total: meter
                .u64_counter("tether.client.errors.total")
                .with_description("Errors by kind")
                .build(),
            reconnection_attempts: meter
                .u64_counter("tether.client.reconnection.attempts")
                .with_description("Connect attempts after the first")
                .build(),
            reconnection_success: meter
                .u64_counter("tether.client.reconnection.success")
                .with_description("Connections re-established")
                .build(),
            deferred_sends: meter
                .u64_counter("tether.client.sends.deferred")
                .with_description("Payloads queued while disconnected")
                .build(),
            send_timeouts: meter
                .u64_counter("tether.client.sends.timeouts")
                .with_description("Queued payloads that expired before a connection opened")
                .build(),
        }
    }

    pub fn update_connection_state(&self, state: i64) {
        self.connection_state.record(state, &[]);
    }

    /// Record the outcome of a call; `status` is "success" or an error kind
    pub fn record_call(&self, method: &str, status: &str, duration_secs: f64) {
        let attributes = &[
            KeyValue::new("method", method.to_string()),
            KeyValue::new("status", status.to_string()),
        ];
        self.calls_total.add(1, attributes);
        self.call_duration.record(duration_secs, attributes);
    }

    pub fn record_stream_push(&self) {
        self.stream_pushes.add(1, &[]);
    }

    pub fn record_error(&self, kind: &str) {
        self.errors_total
            .add(1, &[KeyValue::new("kind", kind.to_string())]);
    }

    pub fn record_reconnection_attempt(&self) {
        self.reconnection_attempts.add(1, &[]);
    }

    pub fn record_reconnection_success(&self) {
        self.reconnection_success.add(1, &[]);
    }

    pub fn record_deferred_send(&self) {
        self.deferred_sends.add(1, &[]);
    }

    pub fn record_send_timeouts(&self, count: u64) {
        if count > 0 {
            self.send_timeouts.add(count, &[]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording_without_provider() {
        let metrics = ClientMetrics::new("test-client");

        metrics.update_connection_state(2);
        metrics.record_call("chat.send", "success", 0.05);
        metrics.record_call("chat.send", "receive_timeout", 1.0);
        metrics.record_stream_push();
        metrics.record_error("decode");
        metrics.record_reconnection_attempt();
        metrics.record_reconnection_success();
        metrics.record_deferred_send();
        metrics.record_send_timeouts(0);
        metrics.record_send_timeouts(3);
    }
}
