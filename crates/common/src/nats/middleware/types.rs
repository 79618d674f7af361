use async_nats::HeaderMap;
use bytes::Bytes;

/// Request to publish a message to NATS
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub subject: String,
    pub payload: Bytes,
    pub headers: HeaderMap,
}

impl PublishRequest {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
            headers: HeaderMap::new(),
        }
    }

    /// JSON payload marked with a `Content-Type` header
    pub fn json(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::new(subject, payload).with_header("Content-Type", "application/json")
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// Response from a publish operation
#[derive(Debug)]
pub struct PublishResponse {
    pub subject: String,
}
