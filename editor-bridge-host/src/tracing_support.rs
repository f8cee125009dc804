//! Tracing subscriber setup for host applications.
//!
//! The bridge itself only emits `tracing` events; installing a subscriber is
//! left to the application. These helpers cover the common cases.

use tracing_subscriber::{
    layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError, EnvFilter, Layer, Registry,
};

/// Environment variable checked before `RUST_LOG`
pub const ENV_LOG: &str = "EDITOR_BRIDGE_LOG";

/// Tracing output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TracingFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,

    /// One line per event.
    Compact,

    /// JSON lines, for log collectors.
    Json,
}

/// Tracing configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Log level filter.
    ///
    /// If None, uses `EDITOR_BRIDGE_LOG`, then `RUST_LOG`, then "info".
    pub level: Option<tracing::Level>,

    pub format: TracingFormat,

    /// Include timestamps in output.
    pub timestamps: bool,

    /// Include target module names in output.
    pub target: bool,

    pub thread_ids: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: None,
            format: TracingFormat::Pretty,
            timestamps: true,
            target: true,
            thread_ids: false,
        }
    }
}

/// Initialize a subscriber with default settings.
///
/// Does nothing if a global subscriber is already installed.
pub fn init_subscriber() {
    let _ = init_subscriber_with_config(TracingConfig::default());
}

/// Initialize a subscriber with custom configuration.
///
/// ```ignore
/// use editor_bridge_host::tracing_support::{init_subscriber_with_config, TracingConfig, TracingFormat};
///
/// init_subscriber_with_config(TracingConfig {
///     format: TracingFormat::Json,
///     ..Default::default()
/// })?;
/// ```
pub fn init_subscriber_with_config(config: TracingConfig) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(fmt_layer(&config))
        .with(filter(config.level))
        .try_init()
}

fn filter(level: Option<tracing::Level>) -> EnvFilter {
    if let Some(level) = level {
        return EnvFilter::new(level.to_string());
    }
    EnvFilter::try_from_env(ENV_LOG)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn fmt_layer(config: &TracingConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let layer = tracing_subscriber::fmt::layer()
        .with_target(config.target)
        .with_thread_ids(config.thread_ids);

    match (config.format, config.timestamps) {
        (TracingFormat::Pretty, true) => layer.pretty().boxed(),
        (TracingFormat::Pretty, false) => layer.pretty().without_time().boxed(),
        (TracingFormat::Compact, true) => layer.compact().boxed(),
        (TracingFormat::Compact, false) => layer.compact().without_time().boxed(),
        (TracingFormat::Json, true) => layer.json().boxed(),
        (TracingFormat::Json, false) => layer.json().without_time().boxed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TracingConfig::default();
        assert_eq!(config.format, TracingFormat::Pretty);
        assert!(config.timestamps);
        assert!(config.target);
        assert!(!config.thread_ids);
    }

    #[test]
    fn test_explicit_level_wins() {
        let filter = filter(Some(tracing::Level::DEBUG));
        assert_eq!(
            filter.max_level_hint(),
            Some(tracing_subscriber::filter::LevelFilter::DEBUG)
        );
    }

    #[test]
    fn test_second_init_is_rejected() {
        let config = TracingConfig {
            format: TracingFormat::Compact,
            timestamps: false,
            ..Default::default()
        };
        let first = init_subscriber_with_config(config.clone());
        // Another test may already have installed one.
        let _ = first;
        assert!(init_subscriber_with_config(config).is_err());
    }
}
