use common::telemetry::LogFormat;
use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};
use smpp::SessionConfig;
use sms_worker::SmsWorkerConfig;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format (json, text)
    #[serde(default = "default_log_format")]
    pub log_format: String,

    #[serde(default = "default_service_name")]
    pub service_name: String,

    // NATS configuration
    /// NATS server URL
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Tenant served by this instance
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Root of request and event subjects
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,

    /// JetStream stream holding `<prefix>.create.*.*`
    #[serde(default = "default_request_stream")]
    pub request_stream: String,

    /// JetStream stream holding `<prefix>.events.>`
    #[serde(default = "default_events_stream")]
    pub events_stream: String,

    /// How long one fetch waits for its batch to fill, in milliseconds
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// Deadline for handling one request, in seconds
    #[serde(default = "default_processing_timeout_secs")]
    pub processing_timeout_secs: u64,

    // Submission
    /// Submissions per second towards the operator
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,

    /// Token bucket capacity
    #[serde(default = "default_rate_burst")]
    pub rate_burst: u32,

    /// Requests older than this are dropped, in seconds
    #[serde(default = "default_max_message_age_secs")]
    pub max_message_age_secs: u64,

    // Correlation store
    /// `redis` or `memory`
    #[serde(default = "default_correlation_backend")]
    pub correlation_backend: String,

    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// How often the memory backend drops expired entries, in seconds
    #[serde(default = "default_store_sweep_interval_secs")]
    pub store_sweep_interval_secs: u64,

    // SMPP configuration
    /// SMSC `host:port`
    #[serde(default = "default_smpp_address")]
    pub smpp_address: String,

    #[serde(default = "default_smpp_system_id")]
    pub smpp_system_id: String,

    #[serde(default)]
    pub smpp_password: String,

    #[serde(default)]
    pub smpp_system_type: String,

    /// Connect and bind timeout in seconds
    #[serde(default = "default_smpp_bind_timeout_secs")]
    pub smpp_bind_timeout_secs: u64,

    #[serde(default = "default_smpp_enquire_link_secs")]
    pub smpp_enquire_link_secs: u64,

    /// Hours added to receipt timestamps (operator clocks run ahead)
    #[serde(default = "default_receipt_time_shift_hours")]
    pub receipt_time_shift_hours: i64,

    // Lifecycle
    /// Startup timeout for initialization operations in seconds
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    #[serde(default = "default_closer_timeout_secs")]
    pub closer_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationBackend {
    Redis,
    Memory,
}

impl FromStr for CorrelationBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow::anyhow!("unknown correlation backend: {other}")),
        }
    }
}

/// Operator clocks are never more than a day off
const MAX_RECEIPT_TIME_SHIFT_HOURS: i64 = 24;

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_service_name() -> String {
    "smsgate".to_string()
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_topic() -> String {
    "default".to_string()
}

fn default_subject_prefix() -> String {
    "sms".to_string()
}

fn default_request_stream() -> String {
    "SMS_REQUESTS".to_string()
}

fn default_events_stream() -> String {
    "SMS_EVENTS".to_string()
}

fn default_fetch_timeout_ms() -> u64 {
    10
}

fn default_processing_timeout_secs() -> u64 {
    10
}

fn default_rate_limit() -> u32 {
    10
}

fn default_rate_burst() -> u32 {
    10
}

fn default_max_message_age_secs() -> u64 {
    10_800
}

fn default_correlation_backend() -> String {
    "redis".to_string()
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_store_sweep_interval_secs() -> u64 {
    60
}

fn default_smpp_address() -> String {
    "localhost:2775".to_string()
}

fn default_smpp_system_id() -> String {
    "smsgate".to_string()
}

fn default_smpp_bind_timeout_secs() -> u64 {
    10
}

fn default_smpp_enquire_link_secs() -> u64 {
    5
}

fn default_receipt_time_shift_hours() -> i64 {
    -5
}

fn default_startup_timeout_secs() -> u64 {
    30
}

fn default_closer_timeout_secs() -> u64 {
    10
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config: Self = Config::builder()
            .add_source(Environment::with_prefix("SMSGATE"))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would panic or spin once the service is running
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("fetch_timeout_ms", self.fetch_timeout_ms),
            ("processing_timeout_secs", self.processing_timeout_secs),
            ("rate_limit", u64::from(self.rate_limit)),
            ("rate_burst", u64::from(self.rate_burst)),
            ("max_message_age_secs", self.max_message_age_secs),
            ("store_sweep_interval_secs", self.store_sweep_interval_secs),
            ("smpp_bind_timeout_secs", self.smpp_bind_timeout_secs),
            ("smpp_enquire_link_secs", self.smpp_enquire_link_secs),
            ("startup_timeout_secs", self.startup_timeout_secs),
            ("closer_timeout_secs", self.closer_timeout_secs),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Message(format!("{name} must be greater than zero")));
        }

        if self.receipt_time_shift_hours.unsigned_abs() > MAX_RECEIPT_TIME_SHIFT_HOURS as u64 {
            return Err(ConfigError::Message(format!(
                "receipt_time_shift_hours must be within ±{MAX_RECEIPT_TIME_SHIFT_HOURS}, got {}",
                self.receipt_time_shift_hours
            )));
        }

        self.correlation_backend()
            .map_err(|e| ConfigError::Message(e.to_string()))?;
        self.log_format()
            .map_err(|e| ConfigError::Message(e.to_string()))?;
        Ok(())
    }

    pub fn log_format(&self) -> anyhow::Result<LogFormat> {
        self.log_format.parse()
    }

    pub fn correlation_backend(&self) -> anyhow::Result<CorrelationBackend> {
        self.correlation_backend.parse()
    }

    pub fn worker_config(&self) -> SmsWorkerConfig {
        SmsWorkerConfig {
            request_stream: self.request_stream.clone(),
            subject_prefix: self.subject_prefix.clone(),
            topic: self.topic.clone(),
            rate_limit: self.rate_limit,
            burst: self.rate_burst,
            fetch_timeout: Duration::from_millis(self.fetch_timeout_ms),
            processing_timeout: Duration::from_secs(self.processing_timeout_secs),
            max_message_age: Duration::from_secs(self.max_message_age_secs),
            receipt_shift: chrono::Duration::try_hours(self.receipt_time_shift_hours)
                .unwrap_or_else(chrono::Duration::zero),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            address: self.smpp_address.clone(),
            system_id: self.smpp_system_id.clone(),
            password: self.smpp_password.clone(),
            system_type: self.smpp_system_type.clone(),
            bind_timeout: Duration::from_secs(self.smpp_bind_timeout_secs),
            enquire_link_interval: Duration::from_secs(self.smpp_enquire_link_secs),
        }
    }
}

// Manual impl keeps the SMPP password out of logs
impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .field("nats_url", &self.nats_url)
            .field("topic", &self.topic)
            .field("subject_prefix", &self.subject_prefix)
            .field("request_stream", &self.request_stream)
            .field("events_stream", &self.events_stream)
            .field("rate_limit", &self.rate_limit)
            .field("rate_burst", &self.rate_burst)
            .field("correlation_backend", &self.correlation_backend)
            .field("smpp_address", &self.smpp_address)
            .field("smpp_system_id", &self.smpp_system_id)
            .field("receipt_time_shift_hours", &self.receipt_time_shift_hours)
            .finish_non_exhaustive()
    }
}
