//! Logging initialization
//!
//! Console output through tracing-subscriber with an EnvFilter; optional
//! non-blocking file output under ./logs when enabled in the config.

use anyhow::Result;
use once_cell::sync::Lazy;
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::infrastructure::config::LoggingConfig;

// Keeps the non-blocking writer alive for the process lifetime
static LOG_GUARDS: Lazy<Mutex<Vec<tracing_appender::non_blocking::WorkerGuard>>> =
    Lazy::new(|| Mutex::new(Vec::new()));

pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("aroma_sync={}", config.level)));

    let console_layer = fmt::layer().with_target(false);

    if config.file_output {
        let file_appender = tracing_appender::rolling::daily("logs", "aroma-sync.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        if let Ok(mut guards) = LOG_GUARDS.lock() {
            guards.push(guard);
        }
        let file_layer = fmt::layer().with_ansi(false).with_writer(non_blocking);

        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .try_init()
            .ok();
    }

    Ok(())
}
