//! Stack-orchestration backend and object storage contracts
//!
//! The backend owns the real infrastructure and is the source of truth for
//! a stack's state; nothing here is cached between invocations.
//!
//! - [`http`]: JSON/HTTP client for a remote stack service
//! - [`memory`]: in-process simulation with scripted transitions

pub mod http;
pub mod memory;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::Retryable;

pub use http::{HttpBackendConfig, HttpObjectStore, HttpStackBackend};
pub use memory::{MemoryBackend, MemoryObjectStore};

/// Errors returned by backend and object storage calls
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("request throttled: {0}")]
    Throttled(String),

    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected backend response: {0}")]
    InvalidResponse(String),
}

impl Retryable for BackendError {
    fn is_transient(&self) -> bool {
        matches!(self, BackendError::Unavailable(_) | BackendError::Throttled(_))
    }
}

/// Lifecycle status of a stack as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StackStatus {
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "CREATE_IN_PROGRESS")]
    Creating,
    #[serde(rename = "CREATE_COMPLETE")]
    CreateComplete,
    #[serde(rename = "CREATE_FAILED")]
    CreateFailed,
    #[serde(rename = "DELETE_IN_PROGRESS")]
    Deleting,
    #[serde(rename = "DELETE_COMPLETE")]
    DeleteComplete,
    #[serde(rename = "DELETE_FAILED")]
    DeleteFailed,
    #[serde(other, rename = "UNKNOWN")]
    Unknown,
}

impl StackStatus {
    /// No further transition happens without a new operation
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StackStatus::CreateComplete
                | StackStatus::CreateFailed
                | StackStatus::DeleteComplete
                | StackStatus::DeleteFailed
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StackStatus::CreateFailed | StackStatus::DeleteFailed)
    }

    /// The name is free for a new stack
    pub fn is_absent(&self) -> bool {
        matches!(self, StackStatus::NotFound | StackStatus::DeleteComplete)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StackStatus::NotFound => "NOT_FOUND",
            StackStatus::Creating => "CREATE_IN_PROGRESS",
            StackStatus::CreateComplete => "CREATE_COMPLETE",
            StackStatus::CreateFailed => "CREATE_FAILED",
            StackStatus::Deleting => "DELETE_IN_PROGRESS",
            StackStatus::DeleteComplete => "DELETE_COMPLETE",
            StackStatus::DeleteFailed => "DELETE_FAILED",
            StackStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A key/value output exposed by a stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackOutput {
    pub key: String,
    pub value: String,
}

/// The backend's view of one stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackState {
    pub name: String,
    #[serde(default)]
    pub stack_id: Option<String>,
    pub status: StackStatus,
    #[serde(default)]
    pub status_reason: Option<String>,
    #[serde(default)]
    pub outputs: Vec<StackOutput>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl StackState {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stack_id: None,
            status: StackStatus::NotFound,
            status_reason: None,
            outputs: Vec::new(),
            updated_at: None,
        }
    }

    pub fn output(&self, key: &str) -> Option<&str> {
        self.outputs
            .iter()
            .find(|o| o.key == key)
            .map(|o| o.value.as_str())
    }
}

/// Where the backend reads a template from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TemplateSource {
    /// Submitted inline
    Body(String),
    /// Staged in object storage
    Url(String),
}

/// Parameters of a create-stack call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStackRequest {
    pub name: String,
    pub template: TemplateSource,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Idempotency token so a retried call cannot create two stacks
    pub client_token: String,
    pub disable_rollback: bool,
}

/// Result of a template dry-run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateReport {
    pub valid: bool,
    #[serde(default)]
    pub report: String,
}

/// Declarative stack API
#[async_trait]
pub trait StackBackend: Send + Sync {
    /// Submit a new stack; returns the backend's stack identifier
    async fn create_stack(&self, request: &CreateStackRequest) -> Result<String, BackendError>;

    /// Current state; an absent stack reports [`StackStatus::NotFound`]
    async fn describe_stack(&self, name: &str) -> Result<StackState, BackendError>;

    async fn delete_stack(&self, name: &str) -> Result<(), BackendError>;

    /// Check a template without creating resources
    async fn validate_template(
        &self,
        template: &TemplateSource,
    ) -> Result<TemplateReport, BackendError>;
}

/// Object storage used to stage templates too large to submit inline
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload `body` and return a URL the backend can read it from
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<String, BackendError>;
}
