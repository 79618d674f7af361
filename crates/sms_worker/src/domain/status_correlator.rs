use async_trait::async_trait;
use common::domain::{
    CorrelationRecord, CorrelationStore, DeliveryStatus, SmsError, SmsResult, StatusPublisher,
    StatusRecord,
};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Joins operator notifications with the request they belong to
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait StatusHandler: Send + Sync {
    async fn correlate(&self, event: StatusRecord) -> SmsResult<()>;
}

pub struct StatusCorrelator {
    store: Arc<dyn CorrelationStore>,
    publisher: Arc<dyn StatusPublisher>,
}

impl StatusCorrelator {
    pub fn new(store: Arc<dyn CorrelationStore>, publisher: Arc<dyn StatusPublisher>) -> Self {
        Self { store, publisher }
    }

    /// SENT also promotes the entry to the message-id index so the
    /// receipt arriving later can find it.
    async fn lookup_submission_ack(
        &self,
        event: &StatusRecord,
    ) -> SmsResult<Option<CorrelationRecord>> {
        let Some(mut record) = self.store.read_by_sequence(event.sequence_number).await? else {
            return Ok(None);
        };

        if event.delivery_status == DeliveryStatus::Sent {
            record.sequence_message_id = event.sequence_message_id.clone();
            self.store.write_by_message_id(&record).await?;
        }
        Ok(Some(record))
    }
}

#[async_trait]
impl StatusHandler for StatusCorrelator {
    #[instrument(
        skip(self, event),
        fields(
            status = %event.delivery_status,
            sequence_number = event.sequence_number,
            message_id = %event.sequence_message_id
        )
    )]
    async fn correlate(&self, mut event: StatusRecord) -> SmsResult<()> {
        if event.delivery_status.is_submission_ack() {
            if let Some(record) = self.lookup_submission_ack(&event).await? {
                event.destination_address = record.recipient.clone();
                enrich(&mut event, record);
            }
        } else if let Some(record) = self
            .store
            .take_by_message_id(&event.sequence_message_id)
            .await?
        {
            enrich(&mut event, record);
        }

        if event.sms_id.is_empty() {
            return Err(SmsError::MissingCorrelation {
                sequence_number: event.sequence_number,
                message_id: event.sequence_message_id,
            });
        }

        debug!(sms_id = %event.sms_id, "correlated status event");
        self.publisher.publish(&event).await
    }
}

fn enrich(event: &mut StatusRecord, record: CorrelationRecord) {
    event.sms_id = record.sms_id;
    event.company_id = record.company_id;
    event.tariff_id = record.tariff_id;
    event.is_unicode = record.is_unicode;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::domain::{ErrorKind, MockCorrelationStore, MockStatusPublisher};
    use mockall::predicate::eq;

    fn stored() -> CorrelationRecord {
        CorrelationRecord {
            sms_id: "sms-1".to_string(),
            recipient: "998901234567".to_string(),
            created_at: Utc::now(),
            nick_name: "ACME".to_string(),
            tariff_id: 4,
            company_id: "c-1".to_string(),
            is_unicode: true,
            sequence_number: 7,
            sequence_message_id: String::new(),
        }
    }

    fn event(status: DeliveryStatus) -> StatusRecord {
        StatusRecord {
            delivery_status: status,
            sequence_number: 7,
            sequence_message_id: "abc123".to_string(),
            command_status: "ESME_ROK".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_sent_promotes_and_publishes_enriched_event() {
        // Arrange
        let mut store = MockCorrelationStore::new();
        store
            .expect_read_by_sequence()
            .with(eq(7))
            .times(1)
            .returning(|_| Ok(Some(stored())));
        store
            .expect_write_by_message_id()
            .withf(|record| record.sequence_message_id == "abc123" && record.sms_id == "sms-1")
            .times(1)
            .returning(|_| Ok(()));

        let mut publisher = MockStatusPublisher::new();
        publisher
            .expect_publish()
            .withf(|record| {
                record.sms_id == "sms-1"
                    && record.destination_address == "998901234567"
                    && record.company_id == "c-1"
                    && record.tariff_id == 4
                    && record.is_unicode
                    && record.delivery_status == DeliveryStatus::Sent
            })
            .times(1)
            .returning(|_| Ok(()));

        let correlator = StatusCorrelator::new(Arc::new(store), Arc::new(publisher));

        // Act
        let result = correlator.correlate(event(DeliveryStatus::Sent)).await;

        // Assert
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_failed_ack_is_enriched_without_promotion() {
        let mut store = MockCorrelationStore::new();
        store
            .expect_read_by_sequence()
            .returning(|_| Ok(Some(stored())));
        store.expect_write_by_message_id().never();

        let mut publisher = MockStatusPublisher::new();
        publisher
            .expect_publish()
            .withf(|record| record.sms_id == "sms-1" && record.delivery_status == DeliveryStatus::Failed)
            .times(1)
            .returning(|_| Ok(()));

        let correlator = StatusCorrelator::new(Arc::new(store), Arc::new(publisher));
        correlator
            .correlate(event(DeliveryStatus::Failed))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_receipt_consumes_message_id_entry() {
        let mut store = MockCorrelationStore::new();
        store
            .expect_take_by_message_id()
            .withf(|message_id| message_id == "abc123")
            .times(1)
            .returning(|_| Ok(Some(stored())));

        let mut publisher = MockStatusPublisher::new();
        publisher
            .expect_publish()
            .withf(|record| {
                record.sms_id == "sms-1"
                    && record.delivery_status == DeliveryStatus::Delivered
                    // receipts carry their own addresses
                    && record.destination_address == "998900000000"
            })
            .times(1)
            .returning(|_| Ok(()));

        let mut receipt = event(DeliveryStatus::Delivered);
        receipt.destination_address = "998900000000".to_string();

        let correlator = StatusCorrelator::new(Arc::new(store), Arc::new(publisher));
        correlator.correlate(receipt).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_sequence_is_missing_correlation() {
        let mut store = MockCorrelationStore::new();
        store.expect_read_by_sequence().returning(|_| Ok(None));
        let mut publisher = MockStatusPublisher::new();
        publisher.expect_publish().never();

        let correlator = StatusCorrelator::new(Arc::new(store), Arc::new(publisher));
        let err = correlator
            .correlate(event(DeliveryStatus::Sent))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SmsError::MissingCorrelation {
                sequence_number: 7,
                ..
            }
        ));
        assert_eq!(err.kind(), ErrorKind::NonRecoverable);
    }

    #[tokio::test]
    async fn test_duplicate_receipt_is_missing_correlation() {
        let mut store = MockCorrelationStore::new();
        store.expect_take_by_message_id().returning(|_| Ok(None));
        let mut publisher = MockStatusPublisher::new();
        publisher.expect_publish().never();

        let correlator = StatusCorrelator::new(Arc::new(store), Arc::new(publisher));
        let err = correlator
            .correlate(event(DeliveryStatus::Undeliverable))
            .await
            .unwrap_err();

        assert!(matches!(err, SmsError::MissingCorrelation { .. }));
    }

    #[tokio::test]
    async fn test_store_error_propagates() {
        let mut store = MockCorrelationStore::new();
        store
            .expect_read_by_sequence()
            .returning(|_| Err(SmsError::Store(anyhow::anyhow!("timeout"))));

        let correlator =
            StatusCorrelator::new(Arc::new(store), Arc::new(MockStatusPublisher::new()));
        let err = correlator
            .correlate(event(DeliveryStatus::Sent))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Recoverable);
    }
}
