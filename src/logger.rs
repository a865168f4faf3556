//! Logger collaborator invoked on phase failures.
//!
//! `TracingLogger` forwards records as `tracing` events; `MemoryLogger` keeps
//! them for callers that want to inspect failures after the fact.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Where in the run a record originated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogContext {
    pub phase: String,
    pub phase_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handler_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl LogContext {
    pub fn phase(phase: &str, phase_index: usize) -> Self {
        Self {
            phase: phase.to_string(),
            phase_index,
            ..Default::default()
        }
    }

    pub fn with_handler(mut self, handler_index: usize, handler: impl Into<String>) -> Self {
        self.handler_index = Some(handler_index);
        self.handler = Some(handler.into());
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

pub trait EventLogger: Send + Sync {
    fn record(&self, message: &str, severity: Severity, context: &LogContext);
}

/// Default logger: one `tracing` event per record.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl EventLogger for TracingLogger {
    fn record(&self, message: &str, severity: Severity, context: &LogContext) {
        let phase = context.phase.as_str();
        let phase_index = context.phase_index;
        let handler_index = context.handler_index;
        let handler = context.handler.as_deref().unwrap_or("");
        let error = context.error_message.as_deref().unwrap_or("");
        match severity {
            Severity::Debug => {
                tracing::debug!(phase, phase_index, handler_index, handler, error, "{}", message)
            }
            Severity::Info => {
                tracing::info!(phase, phase_index, handler_index, handler, error, "{}", message)
            }
            Severity::Warning => {
                tracing::warn!(phase, phase_index, handler_index, handler, error, "{}", message)
            }
            Severity::Error => {
                tracing::error!(phase, phase_index, handler_index, handler, error, "{}", message)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub message: String,
    pub severity: Severity,
    pub context: LogContext,
}

/// Logger that keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventLogger for MemoryLogger {
    fn record(&self, message: &str, severity: Severity, context: &LogContext) {
        if let Ok(mut records) = self.records.lock() {
            records.push(LogRecord {
                message: message.to_string(),
                severity,
                context: context.clone(),
            });
        }
    }
}
