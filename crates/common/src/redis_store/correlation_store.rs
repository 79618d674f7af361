use crate::domain::{
    CorrelationRecord, CorrelationStore, SmsError, SmsResult, MESSAGE_ID_INDEX_TTL,
    SEQUENCE_INDEX_TTL,
};
use anyhow::Context;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Redis-backed [`CorrelationStore`] namespaced by tenant topic.
///
/// Keys: `seq:<topic>:<sequence_number>` and `msgid:<topic>:<message_id>`,
/// values are JSON [`CorrelationRecord`]s. The message-id index is consumed
/// with GETDEL so a receipt can only be matched once.
#[derive(Clone)]
pub struct RedisCorrelationStore {
    conn_manager: ConnectionManager,
    topic: String,
}

impl RedisCorrelationStore {
    pub async fn connect(redis_url: &str, topic: impl Into<String>) -> anyhow::Result<Self> {
        let topic = topic.into();
        info!(topic = %topic, "Connecting to Redis");

        let client = Client::open(redis_url).context("Failed to create Redis client")?;
        let conn_manager = ConnectionManager::new(client)
            .await
            .context("Failed to create Redis connection manager")?;

        info!("Successfully connected to Redis");
        Ok(Self {
            conn_manager,
            topic,
        })
    }

    fn sequence_key(&self, sequence_number: i32) -> String {
        sequence_key(&self.topic, sequence_number)
    }

    fn message_id_key(&self, message_id: &str) -> String {
        message_id_key(&self.topic, message_id)
    }

    async fn set_record(
        &self,
        key: &str,
        record: &CorrelationRecord,
        ttl: Duration,
    ) -> SmsResult<()> {
        let mut conn = self.conn_manager.clone();
        let value = serde_json::to_vec(record)
            .context("Failed to serialize correlation record")
            .map_err(SmsError::Store)?;

        let _: () = conn
            .set_ex(key, value, ttl.as_secs())
            .await
            .with_context(|| format!("Failed to write {key}"))
            .map_err(SmsError::Store)?;

        debug!(key = %key, ttl_secs = ttl.as_secs(), "stored correlation record");
        Ok(())
    }
}

pub fn sequence_key(topic: &str, sequence_number: i32) -> String {
    format!("seq:{topic}:{sequence_number}")
}

pub fn message_id_key(topic: &str, message_id: &str) -> String {
    format!("msgid:{topic}:{message_id}")
}

fn decode_record(key: &str, raw: Option<Vec<u8>>) -> SmsResult<Option<CorrelationRecord>> {
    raw.map(|bytes| {
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Corrupt correlation record under {key}"))
            .map_err(SmsError::Store)
    })
    .transpose()
}

#[async_trait]
impl CorrelationStore for RedisCorrelationStore {
    #[instrument(skip(self, record), fields(sequence_number = record.sequence_number))]
    async fn write_by_sequence(&self, record: &CorrelationRecord) -> SmsResult<()> {
        let key = self.sequence_key(record.sequence_number);
        self.set_record(&key, record, SEQUENCE_INDEX_TTL).await
    }

    #[instrument(skip(self))]
    async fn read_by_sequence(
        &self,
        sequence_number: i32,
    ) -> SmsResult<Option<CorrelationRecord>> {
        let mut conn = self.conn_manager.clone();
        let key = self.sequence_key(sequence_number);

        let raw: Option<Vec<u8>> = conn
            .get(&key)
            .await
            .with_context(|| format!("Failed to read {key}"))
            .map_err(SmsError::Store)?;

        decode_record(&key, raw)
    }

    #[instrument(skip(self, record), fields(message_id = %record.sequence_message_id))]
    async fn write_by_message_id(&self, record: &CorrelationRecord) -> SmsResult<()> {
        let key = self.message_id_key(&record.sequence_message_id);
        self.set_record(&key, record, MESSAGE_ID_INDEX_TTL).await
    }

    #[instrument(skip(self))]
    async fn take_by_message_id(
        &self,
        message_id: &str,
    ) -> SmsResult<Option<CorrelationRecord>> {
        let mut conn = self.conn_manager.clone();
        let key = self.message_id_key(message_id);

        let raw: Option<Vec<u8>> = conn
            .get_del(&key)
            .await
            .with_context(|| format!("Failed to take {key}"))
            .map_err(SmsError::Store)?;

        decode_record(&key, raw)
    }
}
