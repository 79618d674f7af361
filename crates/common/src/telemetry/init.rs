use anyhow::{anyhow, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::{LogFormat, TelemetryConfig};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `config.log_level`. JSON output carries
/// the current span and the span list on every event.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match config.log_format {
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_span_list(true)
                .with_current_span(true);
            registry.with(fmt_layer).try_init()
        }
        LogFormat::Text => {
            let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
            registry.with(fmt_layer).try_init()
        }
    };
    result.map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))?;

    info!(service = %config.service_name, format = ?config.log_format, "telemetry initialized");
    Ok(())
}
