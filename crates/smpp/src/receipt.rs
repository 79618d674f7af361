use chrono::{Duration, NaiveDateTime};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use thiserror::Error;

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w+):(\w+)").expect("receipt token pattern is valid"));

const DATE_LAYOUT: &str = "%y%m%d%H%M";
const RENDER_LAYOUT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Shift applied to operator timestamps unless configured otherwise
pub const DEFAULT_TIME_SHIFT_HOURS: i64 = -5;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ReceiptError {
    #[error("{field} {value:?} does not match YYMMDDhhmm")]
    InvalidDate { field: &'static str, value: String },
}

/// Structured form of a delivery receipt's `key:value` text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Operator message id with up to two leading zeros removed
    pub id: String,
    pub stat: String,
    pub err: String,
    pub submit_date: NaiveDateTime,
    pub done_date: NaiveDateTime,
    /// Every token found, dates as they appeared on the wire
    pub fields: HashMap<String, String>,
}

impl DeliveryReceipt {
    pub fn submit_date_rfc3339(&self) -> String {
        render_timestamp(self.submit_date)
    }

    pub fn done_date_rfc3339(&self) -> String {
        render_timestamp(self.done_date)
    }
}

pub fn render_timestamp(ts: NaiveDateTime) -> String {
    ts.format(RENDER_LAYOUT).to_string()
}

/// Parse receipt text such as
/// `id:0123 sub:001 dlvrd:001 submit date:2401021530 done date:2401021531 stat:DELIVRD err:000`.
///
/// Both dates must parse; `shift` is added to each of them.
pub fn parse_receipt(text: &str, shift: Duration) -> Result<DeliveryReceipt, ReceiptError> {
    let content = text
        .replacen("done date", "done_date", 1)
        .replacen("submit date", "submit_date", 1);

    let fields: HashMap<String, String> = TOKEN
        .captures_iter(&content)
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
        .collect();

    let submit_date = parse_date(&fields, "submit_date")? + shift;
    let done_date = parse_date(&fields, "done_date")? + shift;

    Ok(DeliveryReceipt {
        id: strip_message_id(fields.get("id").map(String::as_str).unwrap_or_default()),
        stat: fields.get("stat").cloned().unwrap_or_default(),
        err: fields.get("err").cloned().unwrap_or_default(),
        submit_date,
        done_date,
        fields,
    })
}

fn parse_date(
    fields: &HashMap<String, String>,
    field: &'static str,
) -> Result<NaiveDateTime, ReceiptError> {
    let value = fields.get(field).cloned().unwrap_or_default();
    NaiveDateTime::parse_from_str(&value, DATE_LAYOUT)
        .map_err(|_| ReceiptError::InvalidDate { field, value })
}

/// Remove at most two leading `0` characters
pub fn strip_message_id(id: &str) -> String {
    let once = id.strip_prefix('0').unwrap_or(id);
    once.strip_prefix('0').unwrap_or(once).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECEIPT: &str = "id:0012345 sub:001 dlvrd:001 submit date:2401021530 done date:2401021531 stat:DELIVRD err:000 text:Your code";

    fn shift() -> Duration {
        Duration::hours(DEFAULT_TIME_SHIFT_HOURS)
    }

    #[test]
    fn test_parses_standard_receipt() {
        let receipt = parse_receipt(RECEIPT, shift()).unwrap();

        assert_eq!(receipt.id, "12345");
        assert_eq!(receipt.stat, "DELIVRD");
        assert_eq!(receipt.err, "000");
        assert_eq!(receipt.fields["sub"], "001");
        assert_eq!(receipt.fields["submit_date"], "2401021530");
    }

    #[test]
    fn test_dates_are_shifted_and_rendered() {
        let receipt = parse_receipt(RECEIPT, shift()).unwrap();

        assert_eq!(
            receipt.submit_date.format("%Y-%m-%dT%H:%M:%S").to_string(),
            "2024-01-02T10:30:00"
        );
        assert_eq!(receipt.submit_date_rfc3339(), "2024-01-02T10:30:00Z");
        assert_eq!(receipt.done_date_rfc3339(), "2024-01-02T10:31:00Z");
    }

    #[test]
    fn test_unshifted_date() {
        let receipt = parse_receipt(RECEIPT, Duration::zero()).unwrap();
        assert_eq!(receipt.submit_date_rfc3339(), "2024-01-02T15:30:00Z");
    }

    #[test]
    fn test_shift_crosses_midnight() {
        let text = "id:1 submit date:2401020300 done date:2401020301 stat:DELIVRD";
        let receipt = parse_receipt(text, shift()).unwrap();
        assert_eq!(receipt.submit_date_rfc3339(), "2024-01-01T22:00:00Z");
    }

    #[test]
    fn test_missing_done_date_is_an_error() {
        let err = parse_receipt("id:1 submit date:2401021530 stat:DELIVRD", shift()).unwrap_err();
        assert_eq!(
            err,
            ReceiptError::InvalidDate {
                field: "done_date",
                value: String::new()
            }
        );
    }

    #[test]
    fn test_malformed_submit_date_is_an_error() {
        let text = "id:1 submit date:24010215 done date:2401021531 stat:DELIVRD";
        assert!(matches!(
            parse_receipt(text, shift()),
            Err(ReceiptError::InvalidDate {
                field: "submit_date",
                ..
            })
        ));
    }

    #[test]
    fn test_strip_message_id_removes_at_most_two_zeros() {
        assert_eq!(strip_message_id("000123"), "0123");
        assert_eq!(strip_message_id("0123"), "123");
        assert_eq!(strip_message_id("123"), "123");
        assert_eq!(strip_message_id("00"), "");
        assert_eq!(strip_message_id(""), "");
    }

    #[test]
    fn test_missing_stat_is_empty() {
        let text = "id:1 submit date:2401021530 done date:2401021531";
        let receipt = parse_receipt(text, shift()).unwrap();
        assert!(receipt.stat.is_empty());
    }
}
