use std::path::PathBuf;
use std::time::Instant;

use indexmap::IndexMap;
use metrics::describe_gauge;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
    Layer,
};

use crate::training::metrics::{Phase, METRIC_NAMES};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
    pub enable_telemetry: bool,
    /// When set, events are also written as JSON lines to `<log_directory>/<log_file_name>`.
    pub log_directory: Option<PathBuf>,
    pub log_file_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: Level::INFO,
            format: LogFormat::Compact,
            enable_telemetry: true,
            log_directory: None,
            log_file_name: "watermark.log".to_string(),
        }
    }
}

impl LogConfig {
    /// Console logging plus a `<job_name>.log` file inside the job folder.
    pub fn for_job(job_folder: impl Into<PathBuf>, job_name: &str) -> Self {
        LogConfig {
            log_directory: Some(job_folder.into()),
            log_file_name: format!("{}.log", job_name),
            ..LogConfig::default()
        }
    }
}

/// Initialize the logging system.
///
/// The returned guard flushes the file writer when dropped and must be kept alive for the
/// duration of the run.
pub fn init_logging(config: LogConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::from_default_env()
        .add_directive(config.level.into());

    let fmt_layer = match config.format {
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_span_events(FmtSpan::CLOSE)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_span_events(FmtSpan::CLOSE)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    let guard = match config.log_directory {
        Some(log_dir) => {
            std::fs::create_dir_all(&log_dir)?;

            let file_appender = rolling::never(&log_dir, &config.log_file_name);
            let (writer, guard) = non_blocking(file_appender);

            let file_layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false);

            subscriber.with(file_layer).try_init()?;
            Some(guard)
        }
        None => {
            subscriber.try_init()?;
            None
        }
    };

    if config.enable_telemetry {
        init_metrics();
    }

    Ok(guard)
}

/// Plain console logging at `info`, used before a job folder exists.
pub fn init_simple_logger() -> anyhow::Result<()> {
    init_logging(LogConfig {
        enable_telemetry: false,
        ..LogConfig::default()
    })?;
    Ok(())
}

/// Describe the per-epoch gauges published by `GaugeSink`.
fn init_metrics() {
    for phase in [Phase::Train, Phase::Validation] {
        for name in METRIC_NAMES {
            describe_gauge!(
                format!("watermark_{}_{}", phase, name.replace('-', "_")),
                format!("Mean {} over the last {} epoch", name, phase)
            );
        }
        describe_gauge!(
            format!("watermark_{}_epoch", phase),
            format!("Last completed {} epoch", phase)
        );
    }
}

/// Operation logger for tracking a job from start to finish
pub struct OperationLogger {
    operation_id: String,
    start_time: Instant,
    metadata: IndexMap<String, String>,
}

impl OperationLogger {
    pub fn new(operation_id: impl Into<String>) -> Self {
        let operation_id = operation_id.into();
        tracing::info!(operation_id = %operation_id, "Operation started");

        OperationLogger {
            operation_id,
            start_time: Instant::now(),
            metadata: IndexMap::new(),
        }
    }

    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn log_error(&self, error: &dyn std::error::Error) {
        let elapsed = self.start_time.elapsed();
        tracing::error!(
            operation_id = %self.operation_id,
            elapsed_ms = elapsed.as_millis() as u64,
            error = %error,
            "Operation failed"
        );
    }

    pub fn complete(self) {
        let elapsed = self.start_time.elapsed();
        tracing::info!(
            operation_id = %self.operation_id,
            elapsed_ms = elapsed.as_millis() as u64,
            metadata = ?self.metadata,
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_logger() {
        let mut logger = OperationLogger::new("test_op");
        logger.add_metadata("key1", "value1");
        logger.complete();
    }

    #[test]
    fn test_job_log_config() {
        let config = LogConfig::for_job("/tmp/jobs/run", "run");
        assert_eq!(config.log_directory, Some(PathBuf::from("/tmp/jobs/run")));
        assert_eq!(config.log_file_name, "run.log");
        assert_eq!(config.format, LogFormat::Compact);
    }
}
