mod logging;

pub use logging::{LogQuery, LogRecord, RecentLogLayer, RecentLogs};

use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "evalmux_session" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines instead of human-readable output.
    pub json: bool,
    /// Size of the in-memory warn+ buffer.
    pub recent_capacity: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
            recent_capacity: 256,
        }
    }
}

impl TelemetryConfig {
    /// Filter directive string equivalent to this config, e.g.
    /// `info,evalmux_session=debug`.
    pub fn filter_directives(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter
    }
}

/// Keeps the recent-log buffer reachable after initialisation.
pub struct TelemetryGuard {
    recent: Arc<RecentLogs>,
}

impl TelemetryGuard {
    pub fn recent_logs(&self) -> &RecentLogs {
        &self.recent
    }
}

/// Install the global subscriber. Call once at startup; later calls keep
/// the first subscriber and only return a fresh, unattached buffer.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    // Logs go to stderr; stdout belongs to the session transcript.
    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let recent = Arc::new(RecentLogs::new(config.recent_capacity));

    if let Err(e) = tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .with(RecentLogLayer::new(Arc::clone(&recent)))
        .try_init()
    {
        eprintln!("evalmux-telemetry: subscriber already installed: {e}");
    }

    TelemetryGuard { recent }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_include_module_overrides() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![("evalmux_session".into(), Level::TRACE)],
            ..TelemetryConfig::default()
        };
        assert_eq!(config.filter_directives(), "warn,evalmux_session=trace");
    }

    #[test]
    fn default_directives() {
        assert_eq!(TelemetryConfig::default().filter_directives(), "info");
    }
}
