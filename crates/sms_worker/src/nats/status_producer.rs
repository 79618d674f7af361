use async_trait::async_trait;
use common::domain::{SmsError, SmsResult, StatusPublisher, StatusRecord};
use common::nats::{JetStreamPublisher, LayeredPublisher, NatsPublisherBuilder, PublishRequest};
use std::sync::Arc;
use tower::Service;
use tracing::debug;

/// Publishes canonical status events to `<prefix>.events.<delivery_status>`
pub struct NatsStatusProducer {
    publisher: LayeredPublisher,
    subject_prefix: String,
}

impl NatsStatusProducer {
    pub fn new(jetstream: Arc<dyn JetStreamPublisher>, subject_prefix: impl Into<String>) -> Self {
        let subject_prefix = subject_prefix.into();
        debug!(subject_prefix = %subject_prefix, "initialized status producer");

        let publisher = NatsPublisherBuilder::new(jetstream).with_logging().build();

        Self {
            publisher,
            subject_prefix,
        }
    }

    pub fn subject_for(&self, record: &StatusRecord) -> String {
        format!("{}.events.{}", self.subject_prefix, record.delivery_status)
    }
}

#[async_trait]
impl StatusPublisher for NatsStatusProducer {
    async fn publish(&self, record: &StatusRecord) -> SmsResult<()> {
        let payload = serde_json::to_vec(record).map_err(|e| SmsError::Publish(e.into()))?;
        let request = PublishRequest::json(self.subject_for(record), payload);

        self.publisher
            .clone()
            .call(request)
            .await
            .map_err(SmsError::Publish)?;
        Ok(())
    }
}
