use crate::domain::{SequenceCounter, SubmissionPipeline};
use async_trait::async_trait;
use chrono::Utc;
use common::domain::{CorrelationStore, SmsError, SmsRequest, SmsResult};
use smpp::DataCoding;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Requests older than this are dropped instead of sent
pub const DEFAULT_MAX_MESSAGE_AGE: Duration = Duration::from_secs(10_800);

/// Processes one raw queue payload
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: &[u8]) -> SmsResult<()>;
}

/// Turns a send request into a correlation entry plus submitted PDUs
pub struct SmsRequestHandler {
    sequence: SequenceCounter,
    store: Arc<dyn CorrelationStore>,
    pipeline: Arc<SubmissionPipeline>,
    max_age: Duration,
}

impl SmsRequestHandler {
    pub fn new(store: Arc<dyn CorrelationStore>, pipeline: Arc<SubmissionPipeline>) -> Self {
        Self {
            sequence: SequenceCounter::new(),
            store,
            pipeline,
            max_age: DEFAULT_MAX_MESSAGE_AGE,
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_sequence(mut self, sequence: SequenceCounter) -> Self {
        self.sequence = sequence;
        self
    }
}

#[async_trait]
impl MessageHandler for SmsRequestHandler {
    #[instrument(skip(self, payload), fields(payload_size = payload.len()))]
    async fn handle(&self, payload: &[u8]) -> SmsResult<()> {
        let mut request: SmsRequest = serde_json::from_slice(payload)?;

        let age = request.age(Utc::now());
        // Negative age (sender clock ahead) never expires
        if let Ok(elapsed) = age.to_std() {
            if elapsed > self.max_age {
                return Err(SmsError::MessageExpired {
                    age_secs: age.num_seconds(),
                    max_age_secs: self.max_age.as_secs() as i64,
                });
            }
        }

        request.sequence_number = self.sequence.next();
        let prepared = self.pipeline.prepare(&request)?;
        request.is_unicode = prepared.coding == DataCoding::Ucs2;

        debug!(
            sms_id = %request.sms_id,
            sequence_number = request.sequence_number,
            parts = prepared.parts.len(),
            is_unicode = request.is_unicode,
            "processing send request"
        );

        self.store
            .write_by_sequence(&request.to_correlation_record())
            .await?;

        self.pipeline.send(prepared).await
    }
}
