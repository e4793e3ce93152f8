//! Statement tracing.
//!
//! The adapter reports every traced statement to a [`TraceSink`] with a lazy
//! explain closure, so sinks that drop the event never pay for rendering it.

use crate::config::ShardingConfig;
use crate::error::DbError;
use std::time::{Duration, Instant};
use tracing::{Level, debug, error, warn};

/// Receives one event per traced statement.
pub trait TraceSink: Send + Sync {
    /// `explain` yields the rendered statement and rows affected. It may be
    /// called zero or more times.
    fn trace(&self, begin: Instant, explain: &dyn Fn() -> (String, u64), error: Option<&DbError>);
}

/// Default sink writing statement events through `tracing`.
#[derive(Debug, Clone)]
pub struct LogSink {
    slow_threshold: Duration,
    ignore_not_found: bool,
}

impl LogSink {
    /// A zero `slow_threshold` disables slow statement warnings.
    pub fn new(slow_threshold: Duration, ignore_not_found: bool) -> Self {
        Self {
            slow_threshold,
            ignore_not_found,
        }
    }

    pub fn from_config(config: &ShardingConfig) -> Self {
        Self::new(config.slow_threshold(), config.ignore_not_found)
    }

    fn is_slow(&self, elapsed: Duration) -> bool {
        !self.slow_threshold.is_zero() && elapsed > self.slow_threshold
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::from_config(&ShardingConfig::default())
    }
}

impl TraceSink for LogSink {
    fn trace(&self, begin: Instant, explain: &dyn Fn() -> (String, u64), err: Option<&DbError>) {
        let elapsed = begin.elapsed();
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;

        match err {
            Some(err) if !(self.ignore_not_found && err.is_not_found()) => {
                if tracing::enabled!(Level::ERROR) {
                    let (sql, rows) = explain();
                    error!(elapsed_ms, rows, sql = %sql, error = %err, "Statement failed");
                }
            }
            _ if self.is_slow(elapsed) => {
                if tracing::enabled!(Level::WARN) {
                    let (sql, rows) = explain();
                    warn!(
                        elapsed_ms,
                        rows,
                        sql = %sql,
                        threshold_ms = self.slow_threshold.as_millis() as u64,
                        "Slow statement"
                    );
                }
            }
            _ => {
                if tracing::enabled!(Level::DEBUG) {
                    let (sql, rows) = explain();
                    debug!(elapsed_ms, rows, sql = %sql, "Statement");
                }
            }
        }
    }
}
