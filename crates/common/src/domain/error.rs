use std::time::Duration;
use thiserror::Error;

pub type SmsResult<T> = Result<T, SmsError>;

/// How a failure should be treated at the consumer boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Anticipated outcome: acked, not logged, not counted
    Expected,
    /// Permanent failure: acked (dropped), logged and counted
    NonRecoverable,
    /// Transient failure: left un-acked for broker redelivery, logged and counted
    Recoverable,
}

impl ErrorKind {
    pub fn should_ack(self) -> bool {
        matches!(self, Self::Expected | Self::NonRecoverable)
    }

    pub fn should_report(self) -> bool {
        !matches!(self, Self::Expected)
    }
}

/// Whether a fetched queue item is removed from the queue or left for redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    Ack,
    Leave,
}

impl AckDecision {
    pub fn for_result<T>(result: &SmsResult<T>) -> Self {
        match result {
            Ok(_) => Self::Ack,
            Err(e) if e.kind().should_ack() => Self::Ack,
            Err(_) => Self::Leave,
        }
    }
}

#[derive(Error, Debug)]
pub enum SmsError {
    #[error("failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("message expired: created {age_secs}s ago, limit is {max_age_secs}s")]
    MessageExpired { age_secs: i64, max_age_secs: i64 },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid delivery receipt: {0}")]
    InvalidReceipt(String),

    #[error("sms_id is empty after correlation (sequence_number={sequence_number}, message_id={message_id})")]
    MissingCorrelation {
        sequence_number: i32,
        message_id: String,
    },

    #[error("message segmentation failed: {0}")]
    Segmentation(String),

    #[error("correlation store error: {0}")]
    Store(#[source] anyhow::Error),

    #[error("submission failed: {0}")]
    Submission(#[source] anyhow::Error),

    #[error("publish failed: {0}")]
    Publish(#[source] anyhow::Error),

    #[error("processing timed out after {0:?}")]
    Timeout(Duration),

    #[error("expected error: {0}")]
    Expected(String),
}

impl SmsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Expected(_) => ErrorKind::Expected,
            Self::Decode(_)
            | Self::MessageExpired { .. }
            | Self::InvalidAddress(_)
            | Self::InvalidReceipt(_)
            | Self::MissingCorrelation { .. }
            | Self::Segmentation(_) => ErrorKind::NonRecoverable,
            Self::Store(_)
            | Self::Submission(_)
            | Self::Publish(_)
            | Self::Timeout(_) => ErrorKind::Recoverable,
        }
    }
}
