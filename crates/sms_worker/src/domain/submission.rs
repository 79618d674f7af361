use crate::domain::RateLimiter;
use async_trait::async_trait;
use common::domain::{SmsError, SmsRequest, SmsResult};
use smpp::pdu::{Address, ShortMessage, ESM_CLASS_UDHI};
use smpp::{segment_message, DataCoding};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Ask the SMSC for a delivery receipt on every part
const REGISTERED_DELIVERY: u8 = 1;

/// Outbound side of the operator connection
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait OperatorLink: Send + Sync {
    /// Write one submit_sm tagged with `sequence_number`
    async fn submit(&self, sequence_number: i32, part: ShortMessage) -> anyhow::Result<()>;
}

/// submit_sm PDUs for one request, ready to be sent
#[derive(Debug, Clone)]
pub struct PreparedSubmission {
    pub sequence_number: i32,
    pub coding: DataCoding,
    pub parts: Vec<ShortMessage>,
}

/// Encodes, segments and paces outbound messages onto the operator link
pub struct SubmissionPipeline {
    link: Arc<dyn OperatorLink>,
    limiter: Arc<RateLimiter>,
}

impl SubmissionPipeline {
    pub fn new(link: Arc<dyn OperatorLink>, limiter: Arc<RateLimiter>) -> Self {
        Self { link, limiter }
    }

    /// Build every submit_sm for `request` without touching the link.
    ///
    /// All parts carry the request's sequence number; the low byte of that
    /// number doubles as the concatenation reference.
    pub fn prepare(&self, request: &SmsRequest) -> SmsResult<PreparedSubmission> {
        let coding = DataCoding::for_text(&request.message, request.is_unicode);

        let source = Address::sender(&request.nick_name)
            .map_err(|e| SmsError::InvalidAddress(format!("sender {:?}: {e}", request.nick_name)))?;
        let destination = Address::recipient(&request.recipient).map_err(|e| {
            SmsError::InvalidAddress(format!("recipient {:?}: {e}", request.recipient))
        })?;

        let reference = (request.sequence_number & 0xFF) as u8;
        let payloads = segment_message(&request.message, coding, reference)
            .map_err(|e| SmsError::Segmentation(e.to_string()))?;

        let esm_class = if payloads.len() > 1 { ESM_CLASS_UDHI } else { 0 };
        let parts = payloads
            .into_iter()
            .map(|short_message| ShortMessage {
                source: source.clone(),
                destination: destination.clone(),
                esm_class,
                protocol_id: 0,
                registered_delivery: REGISTERED_DELIVERY,
                replace_if_present_flag: 0,
                data_coding: coding.code(),
                short_message,
                ..Default::default()
            })
            .collect();

        Ok(PreparedSubmission {
            sequence_number: request.sequence_number,
            coding,
            parts,
        })
    }

    /// Send every part, one rate-limiter token each. The first failure
    /// aborts the remaining parts.
    #[instrument(skip(self, submission), fields(sequence_number = submission.sequence_number, parts = submission.parts.len()))]
    pub async fn send(&self, submission: PreparedSubmission) -> SmsResult<()> {
        let total = submission.parts.len();
        for (index, part) in submission.parts.into_iter().enumerate() {
            self.limiter.acquire().await;
            self.link
                .submit(submission.sequence_number, part)
                .await
                .map_err(|e| SmsError::Submission(e.context(format!("part {}/{total}", index + 1))))?;
        }

        debug!(
            sequence_number = submission.sequence_number,
            parts = total,
            "submitted message"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::domain::ErrorKind;
    use mockall::predicate::eq;

    fn request(message: &str) -> SmsRequest {
        SmsRequest {
            sms_id: "sms-1".to_string(),
            message: message.to_string(),
            recipient: "998901234567".to_string(),
            created_at: Utc::now(),
            nick_name: "ACME".to_string(),
            tariff_id: 1,
            company_id: "c-1".to_string(),
            is_unicode: false,
            sequence_number: 0x0102,
            sequence_message_id: String::new(),
        }
    }

    fn pipeline(link: MockOperatorLink) -> SubmissionPipeline {
        SubmissionPipeline::new(Arc::new(link), Arc::new(RateLimiter::new(1000, 1000)))
    }

    #[test]
    fn test_single_part_message() {
        let prepared = pipeline(MockOperatorLink::new())
            .prepare(&request("Your code is 1234"))
            .unwrap();

        assert_eq!(prepared.parts.len(), 1);
        let part = &prepared.parts[0];
        assert_eq!(part.esm_class, 0);
        assert_eq!(part.data_coding, 0x00);
        assert_eq!(part.registered_delivery, 1);
        assert_eq!(part.source.ton, 5);
        assert_eq!(part.destination.ton, 1);
        assert_eq!(part.destination.npi, 1);
        assert_eq!(part.short_message.as_ref(), b"Your code is 1234");
    }

    #[test]
    fn test_multipart_message_sets_udhi_on_every_part() {
        let prepared = pipeline(MockOperatorLink::new())
            .prepare(&request(&"a".repeat(200)))
            .unwrap();

        assert_eq!(prepared.parts.len(), 2);
        for part in &prepared.parts {
            assert_eq!(part.esm_class, ESM_CLASS_UDHI);
            // reference is the low byte of the sequence number
            assert_eq!(part.short_message[3], 0x02);
        }
    }

    #[test]
    fn test_unicode_text_uses_ucs2() {
        let prepared = pipeline(MockOperatorLink::new())
            .prepare(&request("Код: 1234"))
            .unwrap();

        assert_eq!(prepared.coding, DataCoding::Ucs2);
        assert_eq!(prepared.parts[0].data_coding, 0x08);
    }

    #[test]
    fn test_numeric_sender_is_network_specific() {
        let mut req = request("hi");
        req.nick_name = "1234".to_string();
        let prepared = pipeline(MockOperatorLink::new()).prepare(&req).unwrap();
        assert_eq!(prepared.parts[0].source.ton, 3);
    }

    #[test]
    fn test_oversized_sender_is_non_recoverable() {
        let mut req = request("hi");
        req.nick_name = "A".repeat(40);

        let err = pipeline(MockOperatorLink::new()).prepare(&req).unwrap_err();
        assert!(matches!(err, SmsError::InvalidAddress(_)));
        assert_eq!(err.kind(), ErrorKind::NonRecoverable);
    }

    #[tokio::test]
    async fn test_every_part_is_submitted_with_the_request_sequence_number() {
        // Arrange
        let mut link = MockOperatorLink::new();
        link.expect_submit()
            .with(eq(0x0102), mockall::predicate::always())
            .times(3)
            .returning(|_, _| Ok(()));
        let pipeline = pipeline(link);
        let prepared = pipeline.prepare(&request(&"a".repeat(400))).unwrap();
        assert_eq!(prepared.parts.len(), 3);

        // Act
        let result = pipeline.send(prepared).await;

        // Assert
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_failure_aborts_remaining_parts() {
        let mut link = MockOperatorLink::new();
        let mut seq = mockall::Sequence::new();
        link.expect_submit()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        link.expect_submit()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(anyhow::anyhow!("session is closed")));

        let pipeline = pipeline(link);
        let prepared = pipeline.prepare(&request(&"a".repeat(400))).unwrap();

        let err = pipeline.send(prepared).await.unwrap_err();
        assert!(matches!(err, SmsError::Submission(_)));
        assert_eq!(err.kind(), ErrorKind::Recoverable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_part_consumes_a_token() {
        let mut link = MockOperatorLink::new();
        link.expect_submit().times(3).returning(|_, _| Ok(()));
        let limiter = Arc::new(RateLimiter::new(1, 3));
        let pipeline = SubmissionPipeline::new(Arc::new(link), limiter.clone());

        let prepared = pipeline.prepare(&request(&"a".repeat(400))).unwrap();
        pipeline.send(prepared).await.unwrap();

        assert!(!limiter.try_acquire());
    }
}
