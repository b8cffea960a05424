use std::fmt;
use std::io;

use thiserror::Error;

use crate::assets::AssetError;
use crate::backend::{BackendError, StackState, StackStatus};
use crate::config::ConfigError;
use crate::retry::Retryable;

/// Errors from cluster lifecycle operations
///
/// Network plan violations arrive through [`ConfigError::Network`].
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Precondition(String),

    #[error("{operation} failed after {attempts} attempts: {source}")]
    BackendTransient {
        operation: String,
        attempts: u32,
        #[source]
        source: BackendError,
    },

    #[error("{operation} failed: {source}")]
    BackendRejected {
        operation: String,
        #[source]
        source: BackendError,
    },

    #[error("stack '{stack}' ended in {status}: {}", .reason.as_deref().unwrap_or("no reason reported"))]
    BackendTerminal {
        stack: String,
        status: StackStatus,
        reason: Option<String>,
    },

    #[error("timed out waiting for stack '{stack}' to {operation} after {attempts} attempts{}; the backend may still be working", describe_last(.last_status, .last_error))]
    Timeout {
        stack: String,
        operation: String,
        attempts: u32,
        last_status: Option<StackStatus>,
        last_error: Option<BackendError>,
    },

    #[error("stack template failed validation: {0}")]
    TemplateInvalid(String),

    #[error("asset generation failed: {0}")]
    AssetGeneration(#[from] AssetError),

    #[error("{operation} cancelled")]
    Cancelled { operation: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ClusterError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClusterError::Timeout { .. })
    }

    /// The backend itself reported a failed state
    pub fn is_backend_terminal(&self) -> bool {
        matches!(self, ClusterError::BackendTerminal { .. })
    }

    pub(crate) fn terminal(state: StackState) -> Self {
        ClusterError::BackendTerminal {
            stack: state.name,
            status: state.status,
            reason: state.status_reason,
        }
    }
}

fn describe_last(status: &Option<StackStatus>, error: &Option<BackendError>) -> String {
    match (status, error) {
        (_, Some(e)) => format!(" (last error: {})", e),
        (Some(s), None) => format!(" (last status: {})", s),
        (None, None) => String::new(),
    }
}

/// Failure of one poll attempt
#[derive(Debug)]
pub(crate) enum WaitError {
    Backend(BackendError),
    Terminal(StackState),
}

impl Retryable for WaitError {
    fn is_transient(&self) -> bool {
        match self {
            WaitError::Backend(e) => e.is_transient(),
            WaitError::Terminal(_) => false,
        }
    }
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitError::Backend(e) => write!(f, "{}", e),
            WaitError::Terminal(state) => write!(f, "stack '{}' is {}", state.name, state.status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_mentions_last_status() {
        let err = ClusterError::Timeout {
            stack: "demo".into(),
            operation: "create".into(),
            attempts: 3,
            last_status: Some(StackStatus::Creating),
            last_error: None,
        };
        assert_eq!(
            err.to_string(),
            "timed out waiting for stack 'demo' to create after 3 attempts (last status: CREATE_IN_PROGRESS); the backend may still be working"
        );
        assert!(err.is_timeout());
        assert!(!err.is_backend_terminal());
    }

    #[test]
    fn test_terminal_message() {
        let mut state = StackState::not_found("demo");
        state.status = StackStatus::CreateFailed;
        let err = ClusterError::terminal(state);
        assert_eq!(
            err.to_string(),
            "stack 'demo' ended in CREATE_FAILED: no reason reported"
        );
        assert!(err.is_backend_terminal());
    }

    #[test]
    fn test_wait_error_classification() {
        assert!(WaitError::Backend(BackendError::Throttled("x".into())).is_transient());
        assert!(!WaitError::Terminal(StackState::not_found("demo")).is_transient());
    }
}
