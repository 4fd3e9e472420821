//! Error handling for PrintKit
//!
//! Provides error types for all layers of the job pipeline:
//! - Job errors (streaming state machine, file I/O)
//! - Command errors (control command parameters, dispatch failures)
//! - Chain errors (motion interception stage ordering)
//! - Persistence errors (durable variable writes)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Job streaming error type
///
/// Represents errors raised by the job executor: conflicting requests,
/// file access failures and fatal dispatch failures.
#[derive(Error, Debug, Clone)]
pub enum JobError {
    /// Another job or action already holds the executor
    #[error("Job busy: {action}")]
    Busy {
        /// The action that was rejected.
        action: String,
    },

    /// No job file is loaded
    #[error("No job loaded")]
    NoActiveJob,

    /// Opening, seeking or reading the job file failed
    #[error("Job file I/O error on {path}: {reason}")]
    Io {
        /// The job file path.
        path: String,
        /// The reason for the failure.
        reason: String,
    },

    /// A line of the job failed to dispatch
    #[error("Dispatch failed at byte {offset}: {reason}")]
    Dispatch {
        /// Byte offset of the failing line.
        offset: u64,
        /// The reason the dispatch failed.
        reason: String,
    },

    /// The job was cancelled while the request was pending
    #[error("Job cancelled")]
    Cancelled,
}

/// Command error type
///
/// Represents errors reported by command handlers registered on the
/// command dispatcher.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    /// A parameter could not be parsed
    #[error("Malformed parameter '{param}' in '{command}': {reason}")]
    MalformedParameter {
        /// The command line that carried the parameter.
        command: String,
        /// The parameter name.
        param: String,
        /// The reason the value is invalid.
        reason: String,
    },

    /// A required parameter is absent
    #[error("Missing required parameter '{param}' in '{command}'")]
    MissingParameter {
        /// The command line missing the parameter.
        command: String,
        /// The parameter name.
        param: String,
    },

    /// No handler is registered for the command
    #[error("Unknown command '{name}'")]
    UnknownCommand {
        /// The command word.
        name: String,
    },

    /// Close-count bookkeeping for excluded objects became inconsistent
    #[error("Exclusion overrun: {object} closed {count} times while excluded")]
    ExclusionOverrun {
        /// The object whose close count tripped the threshold.
        object: String,
        /// The close count observed.
        count: u32,
    },

    /// The command was rejected by its handler
    #[error("{reason}")]
    Rejected {
        /// The reason the command was rejected.
        reason: String,
    },
}

impl CommandError {
    /// Create a rejection from a message
    pub fn rejected(reason: impl Into<String>) -> Self {
        CommandError::Rejected {
            reason: reason.into(),
        }
    }

    /// Check if this is the recoverable exclusion overrun condition
    pub fn is_overrun(&self) -> bool {
        matches!(self, CommandError::ExclusionOverrun { .. })
    }
}

impl From<JobError> for CommandError {
    fn from(err: JobError) -> Self {
        CommandError::rejected(err.to_string())
    }
}

/// Motion interception chain error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// A head-only stage was inserted somewhere other than position zero,
    /// or another stage was inserted in front of it
    #[error("Stage '{stage}' must be the first stage of the chain")]
    ExclusionNotFirst {
        /// The stage name.
        stage: String,
    },

    /// A stage with the same name is already installed
    #[error("Stage '{stage}' is already installed")]
    DuplicateStage {
        /// The stage name.
        stage: String,
    },

    /// No stage with the given name is installed
    #[error("Stage '{stage}' not found")]
    StageNotFound {
        /// The stage name.
        stage: String,
    },
}

/// Persistence error type
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// The write queue was full and the snapshot was dropped
    #[error("Variable queue full, write dropped")]
    QueueFull,

    /// The background writer has stopped
    #[error("Variable writer stopped")]
    WriterStopped,

    /// I/O error during persistence
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error during persistence
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Main error type for PrintKit
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Job error
    #[error(transparent)]
    Job(#[from] JobError),

    /// Command error
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Chain error
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// Persistence error
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a busy rejection
    pub fn is_busy(&self) -> bool {
        matches!(self, Error::Job(JobError::Busy { .. }))
    }

    /// Check if this is the exclusion overrun condition
    pub fn is_overrun(&self) -> bool {
        matches!(self, Error::Command(e) if e.is_overrun())
    }

    /// Check if this error ends the current job
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Job(JobError::Io { .. }) | Error::Job(JobError::Dispatch { .. }) => true,
            Error::Io(_) => true,
            _ => false,
        }
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = JobError::Busy {
            action: "resume".to_string(),
        };
        assert_eq!(err.to_string(), "Job busy: resume");

        let err = CommandError::ExclusionOverrun {
            object: "PART_A".to_string(),
            count: 4,
        };
        assert_eq!(
            err.to_string(),
            "Exclusion overrun: PART_A closed 4 times while excluded"
        );
    }

    #[test]
    fn test_error_predicates() {
        let busy: Error = JobError::Busy {
            action: "load".to_string(),
        }
        .into();
        assert!(busy.is_busy());
        assert!(!busy.is_fatal());

        let overrun: Error = CommandError::ExclusionOverrun {
            object: "A".to_string(),
            count: 4,
        }
        .into();
        assert!(overrun.is_overrun());
        assert!(!overrun.is_fatal());

        let io: Error = JobError::Io {
            path: "job.gcode".to_string(),
            reason: "gone".to_string(),
        }
        .into();
        assert!(io.is_fatal());
    }
}
