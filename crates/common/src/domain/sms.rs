use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outbound send request as it arrives on a request subject.
///
/// The correlation keys are assigned by the worker and are never part of
/// the wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmsRequest {
    pub sms_id: String,
    pub message: String,
    pub recipient: String,
    pub created_at: DateTime<Utc>,
    pub nick_name: String,
    #[serde(default)]
    pub tariff_id: i64,
    #[serde(default)]
    pub company_id: String,
    #[serde(default)]
    pub is_unicode: bool,
    #[serde(skip)]
    pub sequence_number: i32,
    #[serde(skip)]
    pub sequence_message_id: String,
}

impl SmsRequest {
    /// Time elapsed between creation and `now`, negative for clock skew
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }

    /// Snapshot stored under the correlation indices, with the body dropped
    pub fn to_correlation_record(&self) -> CorrelationRecord {
        CorrelationRecord {
            sms_id: self.sms_id.clone(),
            recipient: self.recipient.clone(),
            created_at: self.created_at,
            nick_name: self.nick_name.clone(),
            tariff_id: self.tariff_id,
            company_id: self.company_id.clone(),
            is_unicode: self.is_unicode,
            sequence_number: self.sequence_number,
            sequence_message_id: self.sequence_message_id.clone(),
        }
    }
}

/// What the correlation store keeps about a submitted request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationRecord {
    pub sms_id: String,
    pub recipient: String,
    pub created_at: DateTime<Utc>,
    pub nick_name: String,
    pub tariff_id: i64,
    pub company_id: String,
    pub is_unicode: bool,
    pub sequence_number: i32,
    #[serde(default)]
    pub sequence_message_id: String,
}
