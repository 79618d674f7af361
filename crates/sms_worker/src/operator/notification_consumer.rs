use crate::domain::StatusHandler;
use crate::metrics::WorkerMetrics;
use chrono::{SecondsFormat, Utc};
use common::domain::{DeliveryStatus, SmsError, SmsResult, StatusRecord};
use smpp::encoding::decode_text;
use smpp::receipt::DEFAULT_TIME_SHIFT_HOURS;
use smpp::{parse_receipt, Notification};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const SUBMIT_ACK: &str = "submit_ack";
const DELIVERY_RECEIPT: &str = "delivery_receipt";

/// Drains the session's notification channel into the correlator
pub struct NotificationConsumer {
    correlator: Arc<dyn StatusHandler>,
    metrics: WorkerMetrics,
    receipt_shift: chrono::Duration,
}

impl NotificationConsumer {
    pub fn new(correlator: Arc<dyn StatusHandler>, metrics: WorkerMetrics) -> Self {
        Self {
            correlator,
            metrics,
            receipt_shift: chrono::Duration::hours(DEFAULT_TIME_SHIFT_HOURS),
        }
    }

    /// Offset added to receipt timestamps before they are rendered
    pub fn with_receipt_shift(mut self, shift: chrono::Duration) -> Self {
        self.receipt_shift = shift;
        self
    }

    /// Runs until cancelled or until the session drops its sender
    pub async fn run(
        self,
        mut notifications: mpsc::Receiver<Notification>,
        ctx: CancellationToken,
    ) -> anyhow::Result<()> {
        info!("starting notification consumer");
        loop {
            let notification = tokio::select! {
                biased;
                _ = ctx.cancelled() => break,
                next = notifications.recv() => match next {
                    Some(notification) => notification,
                    None => {
                        info!("notification channel closed");
                        break;
                    }
                },
            };
            self.handle(notification).await;
        }
        info!("notification consumer stopped");
        Ok(())
    }

    async fn handle(&self, notification: Notification) {
        let started = Instant::now();
        let message_type = match &notification {
            Notification::SubmitAck { .. } => SUBMIT_ACK,
            Notification::Delivery { .. } => DELIVERY_RECEIPT,
        };
        self.metrics.record_received(message_type);

        let result = match self.to_status_record(notification) {
            Ok(record) => self.correlator.correlate(record).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            if e.kind().should_report() {
                self.metrics.record_error(message_type);
                error!(message_type, kind = ?e.kind(), error = %e, "failed to process notification");
            }
        }
        self.metrics.observe_duration(message_type, started.elapsed());
    }

    /// Build the uncorrelated status event for one notification
    pub fn to_status_record(&self, notification: Notification) -> SmsResult<StatusRecord> {
        match notification {
            Notification::SubmitAck {
                sequence_number,
                command_status,
                message_id,
            } => {
                let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
                let delivery_status = if command_status.is_ok() {
                    DeliveryStatus::Sent
                } else {
                    DeliveryStatus::Failed
                };
                debug!(sequence_number, %command_status, %message_id, "submit_sm_resp");

                Ok(StatusRecord {
                    command_status: command_status.to_string(),
                    submit_date: now.clone(),
                    done_date: now,
                    delivery_status,
                    sequence_number: sequence_number as i32,
                    sequence_message_id: message_id,
                    ..Default::default()
                })
            }
            Notification::Delivery {
                sequence_number,
                command_status,
                message,
            } => {
                let text = decode_text(message.data_coding, &message.short_message);
                let receipt = parse_receipt(&text, self.receipt_shift)
                    .map_err(|e| SmsError::InvalidReceipt(e.to_string()))?;
                debug!(sequence_number, message_id = %receipt.id, stat = %receipt.stat, "deliver_sm");

                Ok(StatusRecord {
                    // receipts travel handset -> ESME, so the addresses swap
                    destination_address: message.source.address,
                    source_address: message.destination.address,
                    command_status: command_status.to_string(),
                    submit_date: receipt.submit_date_rfc3339(),
                    done_date: receipt.done_date_rfc3339(),
                    delivery_status: receipt_status(&receipt.stat, &receipt.id),
                    sequence_number: sequence_number as i32,
                    sequence_message_id: receipt.id,
                    ..Default::default()
                })
            }
        }
    }
}

/// Map a receipt `stat:` field, keeping unrecognised values in the log
fn receipt_status(stat: &str, message_id: &str) -> DeliveryStatus {
    let status: DeliveryStatus = stat.parse().unwrap_or_default();
    if status == DeliveryStatus::Unknown && stat != DeliveryStatus::Unknown.as_str() {
        warn!(stat = %stat, %message_id, "unrecognised receipt stat, reporting UNKNOWN");
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MockStatusHandler;
    use bytes::Bytes;
    use smpp::{Address, CommandStatus, ShortMessage};

    fn consumer(correlator: MockStatusHandler) -> NotificationConsumer {
        NotificationConsumer::new(Arc::new(correlator), WorkerMetrics::new().unwrap())
    }

    fn receipt(text: &str) -> Notification {
        Notification::Delivery {
            sequence_number: 41,
            command_status: CommandStatus::ESME_ROK,
            message: ShortMessage {
                source: Address::recipient("998901234567").unwrap(),
                destination: Address::sender("ACME").unwrap(),
                esm_class: 0x04,
                short_message: Bytes::from(text.to_string()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_ok_ack_becomes_sent() {
        let record = consumer(MockStatusHandler::new())
            .to_status_record(Notification::SubmitAck {
                sequence_number: 7,
                command_status: CommandStatus::ESME_ROK,
                message_id: "abc".to_string(),
            })
            .unwrap();

        assert_eq!(record.delivery_status, DeliveryStatus::Sent);
        assert_eq!(record.sequence_number, 7);
        assert_eq!(record.sequence_message_id, "abc");
        assert_eq!(record.command_status, "ESME_ROK");
        assert!(record.submit_date.ends_with('Z'));
    }

    #[test]
    fn test_error_ack_becomes_failed() {
        let record = consumer(MockStatusHandler::new())
            .to_status_record(Notification::SubmitAck {
                sequence_number: 7,
                command_status: CommandStatus::ESME_RTHROTTLED,
                message_id: String::new(),
            })
            .unwrap();

        assert_eq!(record.delivery_status, DeliveryStatus::Failed);
    }

    #[test]
    fn test_receipt_becomes_shifted_status_record() {
        let record = consumer(MockStatusHandler::new())
            .to_status_record(receipt(
                "id:00987 sub:001 dlvrd:001 submit date:2401021530 done date:2401021531 stat:DELIVRD err:000",
            ))
            .unwrap();

        assert_eq!(record.delivery_status, DeliveryStatus::Delivered);
        assert_eq!(record.sequence_message_id, "987");
        assert_eq!(record.destination_address, "998901234567");
        assert_eq!(record.source_address, "ACME");
        assert_eq!(record.submit_date, "2024-01-02T10:30:00Z");
        assert_eq!(record.done_date, "2024-01-02T10:31:00Z");
        assert_eq!(record.sequence_number, 41);
    }

    #[test]
    fn test_custom_receipt_shift() {
        let record = consumer(MockStatusHandler::new())
            .with_receipt_shift(chrono::Duration::zero())
            .to_status_record(receipt(
                "id:1 submit date:2401021530 done date:2401021531 stat:UNDELIV",
            ))
            .unwrap();

        assert_eq!(record.submit_date, "2024-01-02T15:30:00Z");
        assert_eq!(record.delivery_status, DeliveryStatus::Undeliverable);
    }

    #[test]
    fn test_unrecognised_receipt_stat_becomes_unknown() {
        let record = consumer(MockStatusHandler::new())
            .to_status_record(receipt(
                "id:5 submit date:2401021530 done date:2401021531 stat:DELIVERED",
            ))
            .unwrap();

        assert_eq!(record.delivery_status, DeliveryStatus::Unknown);
        assert_eq!(record.sequence_message_id, "5");
    }

    #[test]
    fn test_receipt_status_mapping() {
        assert_eq!(receipt_status("DELIVRD", "1"), DeliveryStatus::Delivered);
        assert_eq!(receipt_status("UNKNOWN", "1"), DeliveryStatus::Unknown);
        assert_eq!(receipt_status("delivrd", "1"), DeliveryStatus::Unknown);
    }

    #[test]
    fn test_bad_receipt_date_is_non_recoverable() {
        let err = consumer(MockStatusHandler::new())
            .to_status_record(receipt("id:1 submit date:garbage stat:DELIVRD"))
            .unwrap_err();

        assert!(matches!(err, SmsError::InvalidReceipt(_)));
        assert_eq!(err.kind(), common::domain::ErrorKind::NonRecoverable);
    }

    #[tokio::test]
    async fn test_run_forwards_notifications_until_channel_closes() {
        // Arrange
        let mut correlator = MockStatusHandler::new();
        correlator
            .expect_correlate()
            .withf(|record| record.delivery_status == DeliveryStatus::Sent)
            .times(1)
            .returning(|_| Ok(()));
        correlator
            .expect_correlate()
            .withf(|record| record.delivery_status == DeliveryStatus::Delivered)
            .times(1)
            .returning(|_| {
                Err(SmsError::MissingCorrelation {
                    sequence_number: 41,
                    message_id: "1".to_string(),
                })
            });

        let metrics = WorkerMetrics::new().unwrap();
        let consumer = NotificationConsumer::new(Arc::new(correlator), metrics.clone());
        let (tx, rx) = mpsc::channel(8);

        tx.send(Notification::SubmitAck {
            sequence_number: 7,
            command_status: CommandStatus::ESME_ROK,
            message_id: "1".to_string(),
        })
        .await
        .unwrap();
        tx.send(receipt("id:1 submit date:2401021530 done date:2401021531 stat:DELIVRD"))
            .await
            .unwrap();
        drop(tx);

        // Act
        consumer.run(rx, CancellationToken::new()).await.unwrap();

        // Assert
        assert_eq!(metrics.received_count(SUBMIT_ACK), 1);
        assert_eq!(metrics.received_count(DELIVERY_RECEIPT), 1);
        assert_eq!(metrics.error_count(DELIVERY_RECEIPT), 1);
        assert_eq!(metrics.error_count(SUBMIT_ACK), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancellation() {
        let consumer = consumer(MockStatusHandler::new());
        let (_tx, rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        token.cancel();

        consumer.run(rx, token).await.unwrap();
    }
}
