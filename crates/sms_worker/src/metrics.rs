use prometheus::{opts, CounterVec, Encoder, HistogramOpts, HistogramVec, Registry, TextEncoder};
use std::time::Duration;

/// Worker counters and timings, registered on a private registry so several
/// workers (or tests) can coexist in one process.
#[derive(Clone)]
pub struct WorkerMetrics {
    registry: Registry,
    messages_received: CounterVec,
    errors_occurred: CounterVec,
    task_duration: HistogramVec,
}

impl WorkerMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let messages_received = CounterVec::new(
            opts!("messages_received", "Messages taken off a queue or the operator link"),
            &["message_type"],
        )?;
        let errors_occurred = CounterVec::new(
            opts!("errors_occurred", "Messages that failed processing"),
            &["processed_message_type"],
        )?;
        let task_duration = HistogramVec::new(
            HistogramOpts::new("task_duration", "Per-message processing time in seconds")
                .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5]),
            &["message_type"],
        )?;

        registry.register(Box::new(messages_received.clone()))?;
        registry.register(Box::new(errors_occurred.clone()))?;
        registry.register(Box::new(task_duration.clone()))?;

        Ok(Self {
            registry,
            messages_received,
            errors_occurred,
            task_duration,
        })
    }

    pub fn record_received(&self, message_type: &str) {
        self.messages_received
            .with_label_values(&[message_type])
            .inc();
    }

    pub fn record_error(&self, message_type: &str) {
        self.errors_occurred.with_label_values(&[message_type]).inc();
    }

    pub fn observe_duration(&self, message_type: &str, elapsed: Duration) {
        self.task_duration
            .with_label_values(&[message_type])
            .observe(elapsed.as_secs_f64());
    }

    pub fn received_count(&self, message_type: &str) -> u64 {
        self.messages_received
            .with_label_values(&[message_type])
            .get() as u64
    }

    pub fn error_count(&self, message_type: &str) -> u64 {
        self.errors_occurred
            .with_label_values(&[message_type])
            .get() as u64
    }

    /// Prometheus text exposition of everything registered
    pub fn export(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_labelled_by_message_type() {
        let metrics = WorkerMetrics::new().unwrap();

        metrics.record_received("otp");
        metrics.record_received("otp");
        metrics.record_received("excel");
        metrics.record_error("otp");

        assert_eq!(metrics.received_count("otp"), 2);
        assert_eq!(metrics.received_count("excel"), 1);
        assert_eq!(metrics.error_count("otp"), 1);
        assert_eq!(metrics.error_count("excel"), 0);
    }

    #[test]
    fn test_export_includes_recorded_series() {
        let metrics = WorkerMetrics::new().unwrap();
        metrics.record_received("default");
        metrics.observe_duration("default", Duration::from_millis(3));

        let text = metrics.export().unwrap();
        assert!(text.contains("messages_received{message_type=\"default\"} 1"));
        assert!(text.contains("task_duration_bucket"));
    }

    #[test]
    fn test_instances_do_not_share_state() {
        let a = WorkerMetrics::new().unwrap();
        let b = WorkerMetrics::new().unwrap();
        a.record_received("otp");
        assert_eq!(b.received_count("otp"), 0);
    }
}
