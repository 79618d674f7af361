use async_nats::jetstream::consumer::{pull, AckPolicy};
use std::time::Duration;

/// Highest priority; drained until empty before the rotation moves on
pub const TOP_RANK: u8 = 0;

/// One request queue polled by the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Label used in logs and as the metrics `message_type`
    pub name: String,
    pub subject: String,
    /// Durable consumer name; instances sharing it split the queue between them
    pub queue_group: String,
    pub fetch_timeout: Duration,
    pub batch_size: usize,
    pub rank: u8,
}

impl Subscription {
    pub fn consumer_config(&self) -> pull::Config {
        pull::Config {
            name: Some(self.queue_group.clone()),
            durable_name: Some(self.queue_group.clone()),
            filter_subject: self.subject.clone(),
            ack_policy: AckPolicy::Explicit,
            ..Default::default()
        }
    }
}

/// The otp/default/excel request queues of one tenant.
///
/// otp gets the full `rate_limit` per fetch, the others half of it.
pub fn standard_subscriptions(
    prefix: &str,
    topic: &str,
    rate_limit: u32,
    fetch_timeout: Duration,
) -> Vec<Subscription> {
    let full = rate_limit.max(1) as usize;
    let half = (rate_limit / 2).max(1) as usize;

    [("otp", full, TOP_RANK), ("default", half, 1), ("excel", half, 2)]
        .into_iter()
        .map(|(kind, batch_size, rank)| Subscription {
            name: kind.to_string(),
            subject: format!("{prefix}.create.{topic}.{kind}"),
            queue_group: format!("smsgate-{kind}-{topic}"),
            fetch_timeout,
            batch_size,
            rank,
        })
        .collect()
}

/// Wildcard covering every request subject of every tenant
pub fn request_stream_subjects(prefix: &str) -> Vec<String> {
    vec![format!("{prefix}.create.*.*")]
}

pub fn event_stream_subjects(prefix: &str) -> Vec<String> {
    vec![format!("{prefix}.events.>")]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_subscriptions_layout() {
        let subs = standard_subscriptions("sms", "acme", 10, Duration::from_millis(10));

        assert_eq!(subs.len(), 3);
        assert_eq!(subs[0].subject, "sms.create.acme.otp");
        assert_eq!(subs[0].rank, TOP_RANK);
        assert_eq!(subs[0].batch_size, 10);
        assert_eq!(subs[1].subject, "sms.create.acme.default");
        assert_eq!(subs[1].batch_size, 5);
        assert_eq!(subs[2].subject, "sms.create.acme.excel");
        assert_eq!(subs[2].batch_size, 5);
    }

    #[test]
    fn test_queue_groups_are_distinct() {
        let subs = standard_subscriptions("sms", "acme", 10, Duration::from_millis(10));
        assert_ne!(subs[0].queue_group, subs[1].queue_group);
        assert_ne!(subs[1].queue_group, subs[2].queue_group);
    }

    #[test]
    fn test_batch_sizes_are_at_least_one() {
        let subs = standard_subscriptions("sms", "acme", 1, Duration::from_millis(10));
        assert!(subs.iter().all(|s| s.batch_size == 1));

        let subs = standard_subscriptions("sms", "acme", 0, Duration::from_millis(10));
        assert!(subs.iter().all(|s| s.batch_size == 1));
    }

    #[test]
    fn test_consumer_config_is_durable_with_explicit_ack() {
        let subs = standard_subscriptions("sms", "acme", 10, Duration::from_millis(10));
        let config = subs[0].consumer_config();

        assert_eq!(config.durable_name.as_deref(), Some("smsgate-otp-acme"));
        assert_eq!(config.filter_subject, "sms.create.acme.otp");
        assert!(matches!(config.ack_policy, AckPolicy::Explicit));
    }

    #[test]
    fn test_stream_subjects() {
        assert_eq!(request_stream_subjects("sms"), vec!["sms.create.*.*"]);
        assert_eq!(event_stream_subjects("sms"), vec!["sms.events.>"]);
    }
}
