use crate::domain::error::SmsResult;
use crate::domain::sms::CorrelationRecord;
use crate::domain::status::StatusRecord;
use async_trait::async_trait;
use std::time::Duration;

/// Lifetime of an entry under the sequence-number index
pub const SEQUENCE_INDEX_TTL: Duration = Duration::from_secs(900);

/// Lifetime of an entry under the message-id index (24h + 1min)
pub const MESSAGE_ID_INDEX_TTL: Duration = Duration::from_secs(24 * 60 * 60 + 60);

/// Two-index store reuniting operator notifications with the original request.
///
/// Lookups that find nothing return `Ok(None)`; only transport failures are
/// errors, and implementations report them as [`crate::SmsError::Store`].
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CorrelationStore: Send + Sync {
    /// Persist under `record.sequence_number` with [`SEQUENCE_INDEX_TTL`]
    async fn write_by_sequence(&self, record: &CorrelationRecord) -> SmsResult<()>;

    /// Read without deleting
    async fn read_by_sequence(&self, sequence_number: i32)
        -> SmsResult<Option<CorrelationRecord>>;

    /// Persist under `record.sequence_message_id` with [`MESSAGE_ID_INDEX_TTL`]
    async fn write_by_message_id(&self, record: &CorrelationRecord) -> SmsResult<()>;

    /// Read and delete; a second call for the same id returns `None`
    async fn take_by_message_id(&self, message_id: &str)
        -> SmsResult<Option<CorrelationRecord>>;
}

/// Publishes canonical status events
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    async fn publish(&self, record: &StatusRecord) -> SmsResult<()>;
}
