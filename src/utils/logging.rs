//! Logging Module
//!
//! Structured logging built on the `tracing` crate, plus small helpers that
//! report progress of long-running steps (image loading, training epochs).

use std::time::Instant;

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to include thread IDs
    pub include_thread_ids: bool,
    /// Whether to use ANSI colors
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Debug-level logging with module targets
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }

    /// Errors only
    pub fn quiet() -> Self {
        Self {
            level: LogLevel::Error,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    /// Parse a level name, falling back to `Info`
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Initialize the global tracing subscriber
///
/// Returns an error message if a global subscriber was already installed.
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.level.to_tracing_level())
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_ids)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Progress logger for long-running operations
pub struct ProgressLogger {
    operation: String,
    total: usize,
    current: usize,
    log_interval: usize,
    start_time: Instant,
}

impl ProgressLogger {
    /// Create a new progress logger that reports roughly every 10%
    pub fn new(operation: &str, total: usize) -> Self {
        Self {
            operation: operation.to_string(),
            total,
            current: 0,
            log_interval: (total / 10).max(1),
            start_time: Instant::now(),
        }
    }

    /// Increment progress by 1
    pub fn increment(&mut self) {
        self.current += 1;

        if self.current % self.log_interval == 0 || self.current == self.total {
            let percentage = 100.0 * self.current as f64 / self.total.max(1) as f64;
            let items_per_sec = self.current as f64 / self.start_time.elapsed().as_secs_f64();

            tracing::debug!(
                "{}: {}/{} ({:.1}%) - {:.1} items/s",
                self.operation,
                self.current,
                self.total,
                percentage,
                items_per_sec
            );
        }
    }

    /// Log completion
    pub fn finish(&self) {
        tracing::info!(
            "{}: completed {} items in {:.2}s",
            self.operation,
            self.current,
            self.start_time.elapsed().as_secs_f64()
        );
    }
}

/// Per-epoch logger for a co-teaching run
pub struct TrainingLogger {
    epoch: usize,
    total_epochs: usize,
    epoch_start: Instant,
    training_start: Instant,
}

impl TrainingLogger {
    /// Create a new training logger
    pub fn new(total_epochs: usize) -> Self {
        Self {
            epoch: 0,
            total_epochs,
            epoch_start: Instant::now(),
            training_start: Instant::now(),
        }
    }

    /// Log start of an epoch (1-based)
    pub fn start_epoch(&mut self, epoch: usize, learning_rate: f64, keep_rate: f64) {
        self.epoch = epoch;
        self.epoch_start = Instant::now();

        tracing::info!(
            "Epoch {}/{} started | LR: {:.2e} | keep rate: {:.3}",
            epoch,
            self.total_epochs,
            learning_rate,
            keep_rate
        );
    }

    /// Log the selected and raw training losses of both networks
    pub fn end_epoch(&self, loss_1: f64, total_loss_1: f64, loss_2: f64, total_loss_2: f64) {
        tracing::info!(
            "Epoch {}/{} done in {:.1}s | Train loss1: {:.4}/{:.4} | Train loss2: {:.4}/{:.4}",
            self.epoch,
            self.total_epochs,
            self.epoch_start.elapsed().as_secs_f64(),
            loss_1,
            total_loss_1,
            loss_2,
            total_loss_2
        );
    }

    /// Log training completion
    pub fn log_complete(&self) {
        tracing::info!(
            "Training complete! {} epochs in {:.1}s",
            self.total_epochs,
            self.training_start.elapsed().as_secs_f64()
        );
    }
}
