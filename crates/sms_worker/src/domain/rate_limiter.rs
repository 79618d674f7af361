//! Token bucket pacing outbound submit_sm PDUs.
//!
//! The bucket refills at `messages_per_second` and holds at most `burst`
//! tokens; every message part consumes one token.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(messages_per_second: f64, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            tokens: capacity,
            capacity,
            refill_rate: messages_per_second,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Take a token, or report how long until one is available
    fn try_consume(&mut self) -> Result<(), Duration> {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let needed = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(needed / self.refill_rate))
        }
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<TokenBucket>,
}

impl RateLimiter {
    /// `messages_per_second` is clamped to at least one
    pub fn new(messages_per_second: u32, burst: u32) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::new(
                f64::from(messages_per_second.max(1)),
                burst,
            )),
        }
    }

    /// Wait until a token is available and consume it
    pub async fn acquire(&self) {
        loop {
            let wait = match self.bucket.lock().try_consume() {
                Ok(()) => return,
                Err(wait) => wait,
            };
            trace!(wait_ms = wait.as_millis() as u64, "rate limited, waiting for token");
            tokio::time::sleep(wait).await;
        }
    }

    /// Non-blocking variant of [`RateLimiter::acquire`]
    pub fn try_acquire(&self) -> bool {
        self.bucket.lock().try_consume().is_ok()
    }
}
