//! Log event model: severity, the builder callers fill in, and the serialized record.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::TaskError;

/// Metadata key under which a correlation id is stored.
pub const CORRELATION_KEY: &str = "correlation_id";

/// Metadata key under which failure context is stored.
pub const EXCEPTION_KEY: &str = "exception";

/// Event severity. Variant order gives `Debug < Info < Warning < Error < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Threshold from an external setting (e.g. `LOG_LEVEL`). Missing or invalid -> `Info`.
    pub fn from_env_value(value: Option<&str>) -> Severity {
        value
            .and_then(|v| v.parse().ok())
            .unwrap_or(Severity::Info)
    }

    /// Failure context is only ever attached at or above this level.
    pub fn carries_failure(self) -> bool {
        self >= Severity::Error
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown severity: {0}")]
pub struct ParseSeverityError(String);

impl FromStr for Severity {
    type Err = ParseSeverityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Severity::Debug),
            "INFO" => Ok(Severity::Info),
            "WARNING" | "WARN" => Ok(Severity::Warning),
            "ERROR" => Ok(Severity::Error),
            "CRITICAL" => Ok(Severity::Critical),
            _ => Err(ParseSeverityError(s.to_string())),
        }
    }
}

/// Kind, message and trace of a caught fault.
///
/// Built by the call site that caught the error and handed to the logger explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureContext {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    /// Error chain, outermost first, followed by backtrace frames when backtraces are enabled.
    pub traceback: Vec<String>,
}

impl FailureContext {
    pub fn from_error(kind: impl Into<String>, err: &(dyn StdError + 'static)) -> Self {
        let kind = kind.into();
        let message = err.to_string();

        let mut traceback = vec![format!("{kind}: {message}")];
        let mut source = err.source();
        while let Some(cause) = source {
            traceback.push(format!("caused by: {cause}"));
            source = cause.source();
        }

        let backtrace = Backtrace::capture();
        if backtrace.status() == BacktraceStatus::Captured {
            traceback.extend(backtrace.to_string().lines().map(str::to_string));
        }

        Self {
            kind,
            message,
            traceback,
        }
    }

    pub fn from_task_error(err: &TaskError) -> Self {
        Self::from_error(err.type_name().to_string(), err)
    }
}

/// One log call, before the logger stamps agent name and timestamp.
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub(crate) severity: Severity,
    pub(crate) event_type: String,
    pub(crate) message: String,
    pub(crate) agent_name: Option<String>,
    pub(crate) metadata: serde_json::Map<String, serde_json::Value>,
    pub(crate) correlation_id: Option<String>,
    pub(crate) failure: Option<FailureContext>,
}

impl LogEvent {
    pub fn new(severity: Severity, event_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            event_type: event_type.into(),
            message: message.into(),
            agent_name: None,
            metadata: serde_json::Map::new(),
            correlation_id: None,
            failure: None,
        }
    }

    pub fn debug(event_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Debug, event_type, message)
    }

    pub fn info(event_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, event_type, message)
    }

    pub fn warning(event_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, event_type, message)
    }

    pub fn error(event_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, event_type, message)
    }

    pub fn critical(event_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Critical, event_type, message)
    }

    /// Override the logger's agent name for this event.
    pub fn for_agent(mut self, agent_name: impl Into<String>) -> Self {
        self.agent_name = Some(agent_name.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        self.metadata.extend(metadata);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl fmt::Display) -> Self {
        self.correlation_id = Some(correlation_id.to_string());
        self
    }

    /// Attach the caught fault. Dropped at emit time if severity is below `Error`.
    pub fn with_failure(mut self, failure: FailureContext) -> Self {
        self.failure = Some(failure);
        self
    }
}

/// Serialized form: exactly one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: String,
    pub agent_name: String,
    pub event_type: String,
    pub severity: Severity,
    pub message: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl LogRecord {
    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata.get(CORRELATION_KEY).and_then(|v| v.as_str())
    }

    pub fn exception(&self) -> Option<FailureContext> {
        self.metadata
            .get(EXCEPTION_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}
