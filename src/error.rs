//! Error types shared by the management client and the service executor.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Raw failure reported by the OS service manager backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (code {code})")]
pub struct ScmError {
    pub code: u32,
    pub message: String,
}

impl ScmError {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[cfg(target_os = "windows")]
impl From<windows::core::Error> for ScmError {
    fn from(e: windows::core::Error) -> Self {
        Self {
            code: e.code().0 as u32,
            message: e.message().to_string(),
        }
    }
}

/// Service manager verb that was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Start,
    SendStop,
    Delete,
    Query,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Create => "create",
            Operation::Start => "start",
            Operation::SendStop => "send stop command to",
            Operation::Delete => "delete",
            Operation::Query => "query status of",
        })
    }
}

/// Errors surfaced by management operations and child process lifecycle.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("service `{0}` is not installed")]
    NotFound(String),

    #[error("service `{0}` already exists")]
    AlreadyExists(String),

    #[error("failed to connect to service manager: {0}")]
    ConnectionFailed(#[source] ScmError),

    #[error("failed to {op} service `{service}`: {source}")]
    OperationFailed {
        op: Operation,
        service: String,
        #[source]
        source: ScmError,
    },

    #[error("timeout of {timeout:?} waiting for service `{service}` to stop exceeded")]
    TimeoutExceeded { service: String, timeout: Duration },

    #[error("failed to start process {}: {source}", path.display())]
    ChildSpawnFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to stop process {pid}: {reason}")]
    ChildTerminationFailed { pid: u32, reason: String },

    #[error("process exited with error: {0}")]
    ChildExited(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ServiceError {
    pub(crate) fn operation(op: Operation, service: &str, source: ScmError) -> Self {
        ServiceError::OperationFailed {
            op,
            service: service.to_string(),
            source,
        }
    }
}
