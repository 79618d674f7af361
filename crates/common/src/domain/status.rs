use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Delivery status vocabulary shared by submission acks and receipts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DeliveryStatus {
    Sent,
    Failed,
    Delivered,
    Undeliverable,
    Rejected,
    Expired,
    Deleted,
    Accepted,
    Enroute,
    #[default]
    Unknown,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
            Self::Delivered => "DELIVRD",
            Self::Undeliverable => "UNDELIV",
            Self::Rejected => "REJECTD",
            Self::Expired => "EXPIRED",
            Self::Deleted => "DELETED",
            Self::Accepted => "ACCEPTD",
            Self::Enroute => "ENROUTE",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Statuses produced by submission acks rather than delivery receipts
    pub fn is_submission_ack(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }
}

impl FromStr for DeliveryStatus {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "SENT" => Self::Sent,
            "FAILED" => Self::Failed,
            "DELIVRD" => Self::Delivered,
            "UNDELIV" => Self::Undeliverable,
            "REJECTD" => Self::Rejected,
            "EXPIRED" => Self::Expired,
            "DELETED" => Self::Deleted,
            "ACCEPTD" => Self::Accepted,
            "ENROUTE" => Self::Enroute,
            _ => Self::Unknown,
        })
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DeliveryStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DeliveryStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(s.parse().unwrap_or(Self::Unknown))
    }
}

/// Canonical status event republished to `<prefix>.events.<delivery_status>`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub sms_id: String,
    pub destination_address: String,
    pub source_address: String,
    pub command_status: String,
    pub submit_date: String,
    pub done_date: String,
    pub delivery_status: DeliveryStatus,
    pub sequence_number: i32,
    pub sequence_message_id: String,
    pub tariff_id: i64,
    pub company_id: String,
    pub is_unicode: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_vocabulary_round_trips_through_str() {
        for status in [
            DeliveryStatus::Sent,
            DeliveryStatus::Failed,
            DeliveryStatus::Delivered,
            DeliveryStatus::Undeliverable,
            DeliveryStatus::Rejected,
            DeliveryStatus::Expired,
            DeliveryStatus::Deleted,
            DeliveryStatus::Accepted,
            DeliveryStatus::Enroute,
            DeliveryStatus::Unknown,
        ] {
            assert_eq!(status.as_str().parse::<DeliveryStatus>(), Ok(status));
        }
    }

    #[test]
    fn test_unrecognised_status_maps_to_unknown() {
        assert_eq!("delivered".parse(), Ok(DeliveryStatus::Unknown));
        assert_eq!("".parse(), Ok(DeliveryStatus::Unknown));
    }

    #[test]
    fn test_status_record_json_shape() {
        let record = StatusRecord {
            sms_id: "sms-1".to_string(),
            destination_address: "998901234567".to_string(),
            delivery_status: DeliveryStatus::Delivered,
            sequence_number: 12,
            ..Default::default()
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["delivery_status"], "DELIVRD");
        assert_eq!(json["destination_address"], "998901234567");
        assert_eq!(json["sequence_number"], 12);
        assert!(json.get("is_unicode").is_some());
    }
}
