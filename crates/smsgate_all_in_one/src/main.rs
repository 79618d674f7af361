mod config;

use common::domain::CorrelationStore;
use common::nats::NatsClient;
use common::redis_store::RedisCorrelationStore;
use common::telemetry::{init_telemetry, TelemetryConfig};
use config::{CorrelationBackend, ServiceConfig};
use smpp::{Notification, SessionDriver};
use sms_worker::nats::{event_stream_subjects, request_stream_subjects};
use sms_worker::{
    InMemoryCorrelationStore, PeriodicTask, SessionLink, SmsWorker, SmsWorkerDeps, WorkerMetrics,
};
use smsgate_runner::Runner;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let log_format = match config.log_format() {
        Ok(format) => format,
        Err(e) => {
            eprintln!("Invalid log format: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_telemetry(&TelemetryConfig {
        service_name: config.service_name.clone(),
        log_level: config.log_level.clone(),
        log_format,
    }) {
        eprintln!("Failed to initialize telemetry: {}", e);
        std::process::exit(1);
    }

    info!(topic = %config.topic, "Starting smsgate service");
    debug!("Configuration: {:?}", config);

    let deps = match initialize_shared_dependencies(&config).await {
        Ok(deps) => deps,
        Err(e) => {
            error!("Failed to initialize shared dependencies: {:#}", e);
            std::process::exit(1);
        }
    };

    let metrics = match WorkerMetrics::new() {
        Ok(metrics) => metrics,
        Err(e) => {
            error!("Failed to register metrics: {}", e);
            std::process::exit(1);
        }
    };

    let mut worker = SmsWorker::new(
        SmsWorkerDeps {
            consumer_client: deps.nats.create_consumer_client(),
            publisher_client: deps.nats.create_publisher_client(),
            store: deps.store,
            link: Arc::new(SessionLink::new(deps.operator.handle)),
            notifications: deps.operator.notifications,
            metrics,
        },
        config.worker_config(),
    );

    if let Some(memory_store) = deps.memory_store {
        worker = worker.with_periodic_task(PeriodicTask::new(
            "correlation-sweep",
            Duration::from_secs(config.store_sweep_interval_secs),
            move || {
                let store = Arc::clone(&memory_store);
                async move {
                    store.purge_expired();
                    Ok(())
                }
            },
        ));
    }

    let mut runner = Runner::new();

    let driver = deps.operator.driver;
    runner = runner.with_named_process("smpp_session", move |ctx| async move {
        driver.run(ctx).await.map_err(anyhow::Error::from)
    });

    for (name, process) in worker.into_runner_processes() {
        runner = runner.with_named_process(name, process);
    }

    runner = runner
        .with_closer({
            let nats_for_close = Arc::clone(&deps.nats);
            move || async move {
                info!("Running cleanup tasks...");
                nats_for_close.close().await?;
                info!("Cleanup complete");
                Ok(())
            }
        })
        .with_closer_timeout(Duration::from_secs(config.closer_timeout_secs));

    runner.run().await;
}

struct OperatorSession {
    handle: smpp::SessionHandle,
    notifications: mpsc::Receiver<Notification>,
    driver: SessionDriver<TcpStream>,
}

struct SharedDependencies {
    nats: Arc<NatsClient>,
    store: Arc<dyn CorrelationStore>,
    /// Set when the memory backend is selected, so it can be swept
    memory_store: Option<Arc<InMemoryCorrelationStore>>,
    operator: OperatorSession,
}

async fn initialize_shared_dependencies(
    config: &ServiceConfig,
) -> anyhow::Result<SharedDependencies> {
    info!("Initializing NATS...");
    let nats = Arc::new(
        NatsClient::connect(
            &config.nats_url,
            Duration::from_secs(config.startup_timeout_secs),
        )
        .await?,
    );
    ensure_nats_streams(&nats, config).await?;

    info!(backend = %config.correlation_backend, "Initializing correlation store...");
    let mut memory_store = None;
    let store: Arc<dyn CorrelationStore> = match config.correlation_backend()? {
        CorrelationBackend::Redis => Arc::new(
            RedisCorrelationStore::connect(&config.redis_url, config.topic.clone()).await?,
        ),
        CorrelationBackend::Memory => {
            let memory = Arc::new(InMemoryCorrelationStore::new());
            memory_store = Some(Arc::clone(&memory));
            memory
        }
    };

    info!("Binding to SMSC...");
    let (handle, notifications, driver) = smpp::connect(&config.session_config()).await?;

    Ok(SharedDependencies {
        nats,
        store,
        memory_store,
        operator: OperatorSession {
            handle,
            notifications,
            driver,
        },
    })
}

async fn ensure_nats_streams(client: &NatsClient, config: &ServiceConfig) -> anyhow::Result<()> {
    client
        .ensure_stream(
            &config.request_stream,
            request_stream_subjects(&config.subject_prefix),
        )
        .await?;
    client
        .ensure_stream(
            &config.events_stream,
            event_stream_subjects(&config.subject_prefix),
        )
        .await?;
    Ok(())
}
