//! Telemetry facade: tracing initialization plus an in-process metrics
//! recorder.
//!
//! Two process classes share this crate. Lifecycle processes initialize
//! once and keep the guard for their lifetime; hook processes initialize
//! lazily, never bind listeners, and snapshot the recorder before exit.
//! Exporters (OTLP, Prometheus) live outside the core and read the
//! snapshot table.

mod metrics;

pub use metrics::{HistogramSummary, MetricsQuery, MetricsRecorder, MetricsSnapshot, MetricType};

use std::path::PathBuf;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Counter name for every persisted audit event, labeled by
/// `event_type` and `severity`.
pub const AUDIT_EVENTS_TOTAL: &str = "audit_events_total";

/// Histogram of tool call durations, in seconds.
pub const TOOL_DURATION_SECONDS: &str = "tool_duration_seconds";

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by `RUST_LOG`.
    pub log_level: Level,
    /// Whether metrics recording is enabled.
    pub metrics_enabled: bool,
    /// Path to the metrics snapshot database.
    pub metrics_db_path: PathBuf,
}

impl TelemetryConfig {
    /// Configuration rooted at a project's `.khoregos` directory.
    #[must_use]
    pub fn for_project(khoregos_dir: &std::path::Path) -> Self {
        Self {
            log_level: Level::INFO,
            metrics_enabled: true,
            metrics_db_path: khoregos_dir.join("metrics.db"),
        }
    }
}

/// Guard returned by [`init_telemetry`]. Dropping it does not uninstall
/// the subscriber; it owns the metrics recorder handle.
pub struct TelemetryGuard {
    metrics_recorder: Option<Arc<MetricsRecorder>>,
}

impl TelemetryGuard {
    /// Access the metrics recorder, if enabled.
    pub fn metrics(&self) -> Option<Arc<MetricsRecorder>> {
        self.metrics_recorder.clone()
    }

    /// Persist current metric values. Called by hook processes before
    /// exit; errors are logged and swallowed.
    pub fn flush(&self) {
        if let Some(recorder) = &self.metrics_recorder {
            if let Err(e) = recorder.snapshot() {
                tracing::warn!(error = %e, "metrics snapshot failed");
            }
        }
    }
}

/// Initialize tracing and metrics. Safe to call more than once in a
/// process (later calls keep the existing subscriber and only build the
/// recorder).
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string().to_lowercase()));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_filter(env_filter);

    // A second init in the same process keeps the first subscriber.
    let _ = tracing_subscriber::registry().with(fmt_layer).try_init();

    let metrics_recorder = if config.metrics_enabled {
        match MetricsRecorder::new(&config.metrics_db_path) {
            Ok(recorder) => Some(Arc::new(recorder)),
            Err(e) => {
                tracing::warn!(error = %e, "failed to open metrics DB");
                None
            }
        }
    } else {
        None
    };

    TelemetryGuard { metrics_recorder }
}
