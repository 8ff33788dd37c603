//! Errors - 失敗の分類とエラー型
//!
//! # 分類
//! - Transient: 一時的なエラー（バックオフ付きでリトライ）
//! - Permanent: 恒久的なエラー（リトライ無意味、即終了）
//! - Unexpected: 分類外の障害（最も重大、CRITICAL で記録して即終了）

use std::error::Error as StdError;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::TaskId;

/// Three-way failure classification driving retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Transient,
    Permanent,
    Unexpected,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Transient => "transient",
            FailureKind::Permanent => "permanent",
            FailureKind::Unexpected => "unexpected",
        }
    }

    /// Only transient failures are worth another attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::Transient)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a unit of work.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{0}")]
    Transient(String),

    #[error("{0}")]
    Permanent(String),

    #[error("{source}")]
    Unexpected {
        type_name: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl TaskError {
    pub fn transient(message: impl Into<String>) -> Self {
        TaskError::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        TaskError::Permanent(message.into())
    }

    /// Wrap any error that does not fit the modeled kinds.
    pub fn unexpected<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        TaskError::Unexpected {
            type_name: short_type_name::<E>().to_string(),
            source: Box::new(err),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            TaskError::Transient(_) => FailureKind::Transient,
            TaskError::Permanent(_) => FailureKind::Permanent,
            TaskError::Unexpected { .. } => FailureKind::Unexpected,
        }
    }

    /// Name reported as `exception.type` in log metadata.
    pub fn type_name(&self) -> &str {
        match self {
            TaskError::Transient(_) => "TransientError",
            TaskError::Permanent(_) => "PermanentError",
            TaskError::Unexpected { type_name, .. } => type_name,
        }
    }
}

/// Failure inside the task store. Handled at the call site, never fatal by itself.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("task {0} is not in progress")]
    NotInProgress(TaskId),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors that stop an agent process.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to register agent {0}")]
    Registration(String),

    #[error("metrics exporter failed: {0}")]
    Exporter(#[from] std::io::Error),

    #[error("agent task aborted: {0}")]
    Aborted(String),
}

/// Panic payload captured from a spawned unit of work.
#[derive(Debug, Error)]
#[error("task panicked: {0}")]
pub struct PanicError(pub String);

fn short_type_name<E>() -> &'static str {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_from_errors() {
        assert_eq!(TaskError::transient("x").kind(), FailureKind::Transient);
        assert_eq!(TaskError::permanent("x").kind(), FailureKind::Permanent);
        let io = std::io::Error::other("disk");
        assert_eq!(TaskError::unexpected(io).kind(), FailureKind::Unexpected);
    }

    #[test]
    fn unexpected_keeps_concrete_type_name_and_source() {
        let err = TaskError::unexpected(std::io::Error::other("disk gone"));
        assert_eq!(err.type_name(), "Error");
        assert_eq!(err.to_string(), "disk gone");
        assert!(err.source().is_some());

        let err = TaskError::unexpected(PanicError("boom".into()));
        assert_eq!(err.type_name(), "PanicError");
    }

    #[test]
    fn only_transient_is_retryable() {
        assert!(FailureKind::Transient.is_retryable());
        assert!(!FailureKind::Permanent.is_retryable());
        assert!(!FailureKind::Unexpected.is_retryable());
        assert_eq!(serde_json::to_string(&FailureKind::Permanent).unwrap(), "\"permanent\"");
    }
}
