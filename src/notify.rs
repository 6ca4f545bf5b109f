//! Sinks for job output.
//!
//! Every line a job prints is handed to a [`Notifier`] together with a
//! [`LogLevel`]. Delivery is fire-and-forget: notifiers never report failure
//! back to the run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warning => write!(f, "warning"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// A single line of job output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub text: String,
    pub level: LogLevel,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str, level: LogLevel);
}

/// Emits job output as tracing events.
#[derive(Debug, Clone)]
pub struct TracingNotifier {
    job_name: String,
    run_id: String,
}

impl TracingNotifier {
    pub fn new(job_name: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            run_id: run_id.into(),
        }
    }
}

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, text: &str, level: LogLevel) {
        let job_name = self.job_name.as_str();
        let run_id = self.run_id.as_str();
        match level {
            LogLevel::Debug => tracing::debug!(job_name, run_id, "{}", text),
            LogLevel::Info => tracing::info!(job_name, run_id, "{}", text),
            LogLevel::Warning => tracing::warn!(job_name, run_id, "{}", text),
            LogLevel::Error => tracing::error!(job_name, run_id, "{}", text),
        }
    }
}

/// Forwards job output over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<LogEvent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LogEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(&self, text: &str, level: LogLevel) {
        // Receiver dropped, nobody is listening
        let _ = self.tx.send(LogEvent {
            text: text.to_string(),
            level,
        });
    }
}
