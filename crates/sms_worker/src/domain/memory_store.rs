use async_trait::async_trait;
use common::domain::{
    CorrelationRecord, CorrelationStore, SmsResult, MESSAGE_ID_INDEX_TTL, SEQUENCE_INDEX_TTL,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

struct Expiring {
    record: CorrelationRecord,
    expires_at: Instant,
}

/// TTL map keyed by one correlation index
struct Index<K> {
    entries: HashMap<K, Expiring>,
    ttl: Duration,
}

impl<K: Eq + Hash> Index<K> {
    fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    fn insert(&mut self, key: K, record: CorrelationRecord, now: Instant) {
        let expires_at = now + self.ttl;
        self.entries.insert(key, Expiring { record, expires_at });
    }

    fn get(&self, key: &K, now: Instant) -> Option<CorrelationRecord> {
        self.entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.record.clone())
    }

    fn take(&mut self, key: &K, now: Instant) -> Option<CorrelationRecord> {
        self.entries
            .remove(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.record)
    }

    fn purge(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }
}

/// Process-local [`CorrelationStore`] for single-instance deployments and
/// tests. Expired entries are invisible immediately and reclaimed by
/// [`InMemoryCorrelationStore::purge_expired`].
pub struct InMemoryCorrelationStore {
    by_sequence: Mutex<Index<i32>>,
    by_message_id: Mutex<Index<String>>,
}

impl Default for InMemoryCorrelationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCorrelationStore {
    pub fn new() -> Self {
        Self::with_ttls(SEQUENCE_INDEX_TTL, MESSAGE_ID_INDEX_TTL)
    }

    pub fn with_ttls(sequence_ttl: Duration, message_id_ttl: Duration) -> Self {
        Self {
            by_sequence: Mutex::new(Index::new(sequence_ttl)),
            by_message_id: Mutex::new(Index::new(message_id_ttl)),
        }
    }

    /// Drop expired entries from both indices, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let removed = self.by_sequence.lock().purge(now) + self.by_message_id.lock().purge(now);
        if removed > 0 {
            debug!(removed, "purged expired correlation entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.by_sequence.lock().entries.len() + self.by_message_id.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CorrelationStore for InMemoryCorrelationStore {
    async fn write_by_sequence(&self, record: &CorrelationRecord) -> SmsResult<()> {
        self.by_sequence
            .lock()
            .insert(record.sequence_number, record.clone(), Instant::now());
        Ok(())
    }

    async fn read_by_sequence(&self, sequence_number: i32) -> SmsResult<Option<CorrelationRecord>> {
        Ok(self.by_sequence.lock().get(&sequence_number, Instant::now()))
    }

    async fn write_by_message_id(&self, record: &CorrelationRecord) -> SmsResult<()> {
        self.by_message_id.lock().insert(
            record.sequence_message_id.clone(),
            record.clone(),
            Instant::now(),
        );
        Ok(())
    }

    async fn take_by_message_id(&self, message_id: &str) -> SmsResult<Option<CorrelationRecord>> {
        Ok(self
            .by_message_id
            .lock()
            .take(&message_id.to_string(), Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(sequence_number: i32, message_id: &str) -> CorrelationRecord {
        CorrelationRecord {
            sms_id: format!("sms-{sequence_number}"),
            recipient: "998901234567".to_string(),
            created_at: Utc::now(),
            nick_name: "ACME".to_string(),
            tariff_id: 1,
            company_id: "c-1".to_string(),
            is_unicode: false,
            sequence_number,
            sequence_message_id: message_id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_read_by_sequence_does_not_consume() {
        let store = InMemoryCorrelationStore::new();
        store.write_by_sequence(&record(5, "")).await.unwrap();

        assert!(store.read_by_sequence(5).await.unwrap().is_some());
        assert!(store.read_by_sequence(5).await.unwrap().is_some());
        assert!(store.read_by_sequence(6).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_take_by_message_id_is_single_use() {
        let store = InMemoryCorrelationStore::new();
        store.write_by_message_id(&record(5, "abc")).await.unwrap();

        let first = store.take_by_message_id("abc").await.unwrap();
        assert_eq!(first.unwrap().sms_id, "sms-5");
        assert!(store.take_by_message_id("abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rewrite_replaces_entry() {
        let store = InMemoryCorrelationStore::new();
        store.write_by_sequence(&record(5, "")).await.unwrap();
        let mut newer = record(5, "");
        newer.sms_id = "sms-new".to_string();
        store.write_by_sequence(&newer).await.unwrap();

        let found = store.read_by_sequence(5).await.unwrap().unwrap();
        assert_eq!(found.sms_id, "sms-new");
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_per_index() {
        let store = InMemoryCorrelationStore::new();
        store.write_by_sequence(&record(5, "")).await.unwrap();
        store.write_by_message_id(&record(5, "abc")).await.unwrap();

        tokio::time::advance(SEQUENCE_INDEX_TTL + Duration::from_secs(1)).await;

        assert!(store.read_by_sequence(5).await.unwrap().is_none());
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);

        tokio::time::advance(MESSAGE_ID_INDEX_TTL).await;
        assert!(store.take_by_message_id("abc").await.unwrap().is_none());
        assert!(store.is_empty());
    }
}
