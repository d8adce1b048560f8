use std::fmt;

use bytestring::ByteString;
use serde::{Deserialize, Serialize};

use crate::identifiers::MessageId;

pub mod codes {
    /// Executor returned an error or panicked.
    pub const INTERNAL: u16 = 500;
    /// The callee rejected the request payload against its own declaration.
    pub const INVALID_ARGUMENT: u16 = 400;
    /// The executor produced a result outside its declared return shape.
    pub const INVALID_RESULT: u16 = 502;
    /// Execution had started when the callee restarted; it will not run again.
    pub const INTERRUPTED: u16 = 503;
}

/// Error payload of a failure Response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationError {
    pub code: u16,
    pub message: ByteString,
}

impl InvocationError {
    pub fn new(code: u16, message: impl Into<ByteString>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl fmt::Display) -> Self {
        Self::new(codes::INTERNAL, message.to_string())
    }

    pub fn interrupted() -> Self {
        Self::new(codes::INTERRUPTED, "execution was interrupted by a restart")
    }
}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for InvocationError {}

/// Failure reported by the log aggregate when appending.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LogError {
    #[error("log is closed")]
    Closed,
    #[error("append rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("'{name}' violates its declared shape: {reason}")]
    SchemaViolation { name: String, reason: String },
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("unknown name '{0}'")]
    UnknownName(String),
    #[error("execution failed: {0}")]
    ExecutionFailure(InvocationError),
    #[error("request {0} was already executed by this peer")]
    DuplicateExecutionRisk(MessageId),
    #[error(transparent)]
    Log(#[from] LogError),
    #[error("peer is closed")]
    Closed,
}

impl Error {
    pub fn schema(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::SchemaViolation {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
