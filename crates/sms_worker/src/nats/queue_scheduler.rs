use crate::domain::MessageHandler;
use crate::metrics::WorkerMetrics;
use crate::nats::{Subscription, TOP_RANK};
use anyhow::{Context, Result};
use common::domain::{AckDecision, SmsError, SmsResult};
use common::nats::{FetchedMessage, JetStreamConsumer, PullConsumer};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upper bound on handling a single queue item
pub const DEFAULT_PROCESSING_TIMEOUT: Duration = Duration::from_secs(10);

/// Position of the next subscription to poll.
///
/// The top-rank subscription keeps the turn while it returns messages;
/// every other subscription gets one fetch per visit.
pub fn next_index(current: usize, len: usize, rank: u8, fetched_any: bool) -> usize {
    if rank == TOP_RANK && fetched_any {
        current
    } else {
        (current + 1) % len
    }
}

struct Lane {
    subscription: Subscription,
    consumer: Box<dyn PullConsumer>,
}

/// Polls a fixed, rank-ordered ring of request queues and feeds every
/// fetched item through the handler, one at a time.
pub struct QueueScheduler {
    jetstream: Arc<dyn JetStreamConsumer>,
    stream_name: String,
    subscriptions: Vec<Subscription>,
    handler: Arc<dyn MessageHandler>,
    metrics: WorkerMetrics,
    processing_timeout: Duration,
}

impl QueueScheduler {
    pub fn new(
        jetstream: Arc<dyn JetStreamConsumer>,
        stream_name: impl Into<String>,
        mut subscriptions: Vec<Subscription>,
        handler: Arc<dyn MessageHandler>,
        metrics: WorkerMetrics,
    ) -> Self {
        subscriptions.sort_by_key(|s| s.rank);
        Self {
            jetstream,
            stream_name: stream_name.into(),
            subscriptions,
            handler,
            metrics,
            processing_timeout: DEFAULT_PROCESSING_TIMEOUT,
        }
    }

    pub fn with_processing_timeout(mut self, timeout: Duration) -> Self {
        self.processing_timeout = timeout;
        self
    }

    /// Create every consumer, then rotate until `ctx` is cancelled.
    ///
    /// Failing to create any consumer aborts before anything is fetched.
    pub async fn run(self, ctx: CancellationToken) -> Result<()> {
        let lanes = self.create_lanes().await?;
        if lanes.is_empty() {
            anyhow::bail!("queue scheduler has no subscriptions");
        }

        info!(
            stream = %self.stream_name,
            subscriptions = lanes.len(),
            "starting queue scheduler"
        );

        let mut index = 0;
        while !ctx.is_cancelled() {
            let lane = &lanes[index];
            let sub = &lane.subscription;

            let messages = match lane
                .consumer
                .fetch_messages(sub.batch_size, sub.fetch_timeout)
                .await
            {
                Ok(messages) => messages,
                Err(e) => {
                    warn!(subscription = %sub.name, error = %e, "fetch failed");
                    tokio::time::sleep(sub.fetch_timeout).await;
                    Vec::new()
                }
            };

            let fetched_any = !messages.is_empty();
            if fetched_any {
                debug!(subscription = %sub.name, count = messages.len(), "fetched batch");
            }
            for message in messages {
                self.process(sub, message).await;
            }

            index = next_index(index, lanes.len(), sub.rank, fetched_any);
        }

        info!(stream = %self.stream_name, "queue scheduler stopped");
        Ok(())
    }

    async fn create_lanes(&self) -> Result<Vec<Lane>> {
        let mut lanes = Vec::with_capacity(self.subscriptions.len());
        for subscription in &self.subscriptions {
            let consumer = self
                .jetstream
                .create_consumer(subscription.consumer_config(), &self.stream_name)
                .await
                .with_context(|| {
                    format!(
                        "failed to create consumer {} for {}",
                        subscription.queue_group, subscription.subject
                    )
                })?;
            debug!(
                subscription = %subscription.name,
                subject = %subscription.subject,
                queue_group = %subscription.queue_group,
                "consumer ready"
            );
            lanes.push(Lane {
                subscription: subscription.clone(),
                consumer,
            });
        }
        Ok(lanes)
    }

    async fn process(&self, sub: &Subscription, message: FetchedMessage) {
        let started = Instant::now();
        self.metrics.record_received(&sub.name);

        let result: SmsResult<()> =
            match tokio::time::timeout(self.processing_timeout, self.handler.handle(&message.payload))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(SmsError::Timeout(self.processing_timeout)),
            };

        if let Err(e) = &result {
            if e.kind().should_report() {
                self.metrics.record_error(&sub.name);
                error!(
                    subscription = %sub.name,
                    subject = %message.subject,
                    kind = ?e.kind(),
                    error = %e,
                    "failed to process message"
                );
            }
        }

        match AckDecision::for_result(&result) {
            AckDecision::Ack => {
                if let Err(e) = message.ack().await {
                    warn!(subscription = %sub.name, error = %e, "failed to ack message");
                }
            }
            AckDecision::Leave => {
                debug!(subscription = %sub.name, "leaving message for redelivery");
            }
        }

        self.metrics.observe_duration(&sub.name, started.elapsed());
    }
}
