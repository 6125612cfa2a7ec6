//! Logging setup.
//!
//! The loader emits `tracing` events under the `pipeloader` target.
//! Nothing is printed until a subscriber is installed, either by the
//! application or with [`setup`] / [`setup_from_env`].

use tracing::level_filters::LevelFilter;
use tracing::Subscriber;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{Layer, Registry};

use crate::errors::{Error, Result};

/// Env var with the log level for [`setup_from_env`].
pub const LOG_ENV_VAR: &str = "PIPELOADER_LOG";

pub(crate) fn parse_level(level: Option<&str>) -> Result<LevelFilter> {
    let Some(level) = level else {
        return Ok(LevelFilter::ERROR);
    };
    match level.trim().to_lowercase().as_str() {
        "trace" => Ok(LevelFilter::TRACE),
        "debug" => Ok(LevelFilter::DEBUG),
        "info" => Ok(LevelFilter::INFO),
        "warn" => Ok(LevelFilter::WARN),
        "error" => Ok(LevelFilter::ERROR),
        "off" => Ok(LevelFilter::OFF),
        other => Err(Error::Configuration(format!("unknown log level: {other}"))),
    }
}

/// Install a compact stdout logger for the `pipeloader` target.
///
/// `level` defaults to `error`.
pub fn setup(level: Option<&str>) -> Result<()> {
    let level = parse_level(level)?;

    let logs = tracing_subscriber::fmt::Layer::default()
        .compact()
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_filter(Targets::new().with_target("pipeloader", level));

    set_global_subscriber(Registry::default().with(logs));
    Ok(())
}

/// [`setup`] with the level read from [`LOG_ENV_VAR`].
pub fn setup_from_env() -> Result<()> {
    let level = std::env::var(LOG_ENV_VAR).ok();
    setup(level.as_deref())
}

// Logs instead of failing when a global subscriber is already set,
// which happens whenever the host application configured its own.
fn set_global_subscriber<S>(subscriber: S)
where
    S: Subscriber + Send + Sync + 'static,
{
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        tracing::warn!("{err}");
    }
}
