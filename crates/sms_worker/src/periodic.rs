use common::domain::SmsResult;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

type TickFuture = Pin<Box<dyn Future<Output = SmsResult<()>> + Send>>;

/// Named action fired on a fixed interval until cancelled.
///
/// The first tick happens one interval after start. Failures are logged
/// unless they are expected; they never stop the task. A zero interval is
/// raised to one millisecond.
pub struct PeriodicTask {
    name: String,
    interval: Duration,
    action: Box<dyn Fn() -> TickFuture + Send + Sync>,
}

impl PeriodicTask {
    pub fn new<F, Fut>(name: impl Into<String>, interval: Duration, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SmsResult<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            interval: interval.max(MIN_INTERVAL),
            action: Box::new(move || Box::pin(action())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn run(self, ctx: CancellationToken) -> anyhow::Result<()> {
        info!(task = %self.name, interval_ms = self.interval.as_millis() as u64, "starting periodic task");

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => break,
                _ = ticker.tick() => {
                    debug!(task = %self.name, "tick");
                    if let Err(e) = (self.action)().await {
                        if e.kind().should_report() {
                            error!(task = %self.name, error = %e, "periodic task failed");
                        }
                    }
                }
            }
        }

        debug!(task = %self.name, "periodic task stopped");
        Ok(())
    }
}
