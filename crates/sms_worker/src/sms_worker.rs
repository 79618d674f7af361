use crate::domain::{
    MessageHandler, OperatorLink, RateLimiter, SmsRequestHandler, StatusCorrelator,
    SubmissionPipeline, DEFAULT_MAX_MESSAGE_AGE,
};
use crate::metrics::WorkerMetrics;
use crate::nats::{
    standard_subscriptions, NatsStatusProducer, QueueScheduler, DEFAULT_PROCESSING_TIMEOUT,
};
use crate::operator::NotificationConsumer;
use crate::periodic::PeriodicTask;
use common::domain::CorrelationStore;
use common::nats::{JetStreamConsumer, JetStreamPublisher};
use smpp::receipt::DEFAULT_TIME_SHIFT_HOURS;
use smpp::Notification;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub type WorkerProcess =
    Box<dyn FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send>;

#[derive(Debug, Clone)]
pub struct SmsWorkerConfig {
    pub request_stream: String,
    pub subject_prefix: String,
    pub topic: String,
    /// Submissions per second towards the operator; also the otp batch size
    pub rate_limit: u32,
    pub burst: u32,
    pub fetch_timeout: Duration,
    pub processing_timeout: Duration,
    pub max_message_age: Duration,
    pub receipt_shift: chrono::Duration,
}

impl Default for SmsWorkerConfig {
    fn default() -> Self {
        Self {
            request_stream: "SMS_REQUESTS".to_string(),
            subject_prefix: "sms".to_string(),
            topic: "default".to_string(),
            rate_limit: 10,
            burst: 10,
            fetch_timeout: Duration::from_millis(10),
            processing_timeout: DEFAULT_PROCESSING_TIMEOUT,
            max_message_age: DEFAULT_MAX_MESSAGE_AGE,
            receipt_shift: chrono::Duration::hours(DEFAULT_TIME_SHIFT_HOURS),
        }
    }
}

/// Everything the worker talks to, built by the caller
pub struct SmsWorkerDeps {
    pub consumer_client: Arc<dyn JetStreamConsumer>,
    pub publisher_client: Arc<dyn JetStreamPublisher>,
    pub store: Arc<dyn CorrelationStore>,
    pub link: Arc<dyn OperatorLink>,
    pub notifications: mpsc::Receiver<Notification>,
    pub metrics: WorkerMetrics,
}

/// One tenant's request scheduler and notification consumer, plus any
/// periodic tasks registered alongside them.
pub struct SmsWorker {
    scheduler: QueueScheduler,
    notification_consumer: NotificationConsumer,
    notifications: mpsc::Receiver<Notification>,
    periodic_tasks: Vec<PeriodicTask>,
}

impl SmsWorker {
    pub fn new(deps: SmsWorkerDeps, config: SmsWorkerConfig) -> Self {
        info!(topic = %config.topic, rate_limit = config.rate_limit, "initializing sms worker");

        let limiter = Arc::new(RateLimiter::new(config.rate_limit, config.burst));
        let pipeline = Arc::new(SubmissionPipeline::new(deps.link, limiter));
        let handler: Arc<dyn MessageHandler> = Arc::new(
            SmsRequestHandler::new(deps.store.clone(), pipeline)
                .with_max_age(config.max_message_age),
        );

        let subscriptions = standard_subscriptions(
            &config.subject_prefix,
            &config.topic,
            config.rate_limit,
            config.fetch_timeout,
        );
        let scheduler = QueueScheduler::new(
            deps.consumer_client,
            config.request_stream.clone(),
            subscriptions,
            handler,
            deps.metrics.clone(),
        )
        .with_processing_timeout(config.processing_timeout);

        let producer = Arc::new(NatsStatusProducer::new(
            deps.publisher_client,
            config.subject_prefix.clone(),
        ));
        let correlator = Arc::new(StatusCorrelator::new(deps.store, producer));
        let notification_consumer = NotificationConsumer::new(correlator, deps.metrics)
            .with_receipt_shift(config.receipt_shift);

        Self {
            scheduler,
            notification_consumer,
            notifications: deps.notifications,
            periodic_tasks: Vec::new(),
        }
    }

    pub fn with_periodic_task(mut self, task: PeriodicTask) -> Self {
        self.periodic_tasks.push(task);
        self
    }

    /// Named long-running loops, each stopped by the shared token
    pub fn into_runner_processes(self) -> Vec<(String, WorkerProcess)> {
        let mut processes: Vec<(String, WorkerProcess)> = vec![
            (
                "queue-scheduler".to_string(),
                Box::new({
                    let scheduler = self.scheduler;
                    move |ctx| Box::pin(async move { scheduler.run(ctx).await })
                }),
            ),
            (
                "notification-consumer".to_string(),
                Box::new({
                    let consumer = self.notification_consumer;
                    let notifications = self.notifications;
                    move |ctx| Box::pin(async move { consumer.run(notifications, ctx).await })
                }),
            ),
        ];

        for task in self.periodic_tasks {
            let name = format!("periodic-{}", task.name());
            processes.push((
                name,
                Box::new(move |ctx| Box::pin(async move { task.run(ctx).await })),
            ));
        }

        processes
    }
}
