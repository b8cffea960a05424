//! Cluster lifecycle orchestration
//!
//! A [`Cluster`] drives one stack on the backend through create, destroy,
//! status and template validation. Nothing is remembered between
//! invocations: every operation starts by asking the backend for the
//! stack's current state.
//!
//! Waits use a fixed-interval poll with a bounded attempt budget.
//! Transient backend errors consume attempts without ending the wait; a
//! failed status reported by the backend ends it at once. Running out of
//! attempts is a [`ClusterError::Timeout`], distinct from
//! [`ClusterError::BackendTerminal`]. Failed stacks are left in place for
//! inspection.

mod error;
mod info;

pub use error::ClusterError;
pub use info::{ClusterInfo, OUTPUT_CONTROLLER_ENDPOINT, OUTPUT_CONTROLLER_IP};

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::assets::{AssetError, AssetPipeline, PreparedAssets};
use crate::backend::{
    BackendError, CreateStackRequest, ObjectStore, StackBackend, StackState, StackStatus,
    TemplateSource,
};
use crate::config::{cluster_config_path, load_cluster_config, ClusterConfig};
use crate::retry::{poll_until, retry_transient, PollPolicy, Progress, RetryError};
use error::WaitError;

/// Largest template submitted inline; bigger ones are staged in object storage
pub const DEFAULT_MAX_INLINE_TEMPLATE_BYTES: usize = 51_200;

/// Process-level orchestration settings
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Attempt budget and interval for waits and transient retries
    pub poll: PollPolicy,
    pub max_inline_template_bytes: usize,
    /// Staging bucket; overrides `stackTemplateBucket` from the cluster file
    pub template_bucket: Option<String>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            poll: PollPolicy::default(),
            max_inline_template_bytes: DEFAULT_MAX_INLINE_TEMPLATE_BYTES,
            template_bucket: None,
        }
    }
}

/// Outcome of a template dry-run. The report is meaningful even when
/// `error` is set.
#[derive(Debug)]
pub struct StackValidation {
    pub report: String,
    pub error: Option<ClusterError>,
}

impl StackValidation {
    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }
}

/// Long-running stack operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackOperation {
    Create,
    Delete,
}

impl StackOperation {
    pub fn verb(&self) -> &'static str {
        match self {
            StackOperation::Create => "create",
            StackOperation::Delete => "delete",
        }
    }
}

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitOutcome {
    Done,
    Waiting,
    Failed,
}

/// What a reported status means for an operation in flight
fn classify(operation: StackOperation, status: StackStatus) -> WaitOutcome {
    use StackStatus::*;
    match operation {
        StackOperation::Create => match status {
            CreateComplete => WaitOutcome::Done,
            // A stack may briefly be invisible right after submission
            Creating | NotFound | Unknown => WaitOutcome::Waiting,
            CreateFailed | Deleting | DeleteComplete | DeleteFailed => WaitOutcome::Failed,
        },
        StackOperation::Delete => match status {
            DeleteComplete | NotFound => WaitOutcome::Done,
            Deleting | Creating | CreateComplete | CreateFailed | Unknown => WaitOutcome::Waiting,
            DeleteFailed => WaitOutcome::Failed,
        },
    }
}

/// Object key for a staged template: `<cluster>/stack-template-<sha256 prefix>.json`
pub fn staged_template_key(cluster_name: &str, template: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(template.as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    format!("{}/stack-template-{}.json", cluster_name, &hash[..16])
}

fn call_error(operation: &str, err: RetryError<BackendError>) -> ClusterError {
    match err {
        RetryError::Fatal(source) => ClusterError::BackendRejected {
            operation: operation.to_string(),
            source,
        },
        RetryError::Exhausted {
            attempts,
            last_error,
        } => ClusterError::BackendTransient {
            operation: operation.to_string(),
            attempts,
            source: last_error
                .unwrap_or_else(|| BackendError::Unavailable("no response".to_string())),
        },
        RetryError::Cancelled { .. } => ClusterError::Cancelled {
            operation: operation.to_string(),
        },
    }
}

fn persist_error(err: AssetError) -> ClusterError {
    match err {
        AssetError::Io(e) => ClusterError::Io(e),
        other => ClusterError::AssetGeneration(other),
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// One cluster's stack on the backend
pub struct Cluster {
    config: ClusterConfig,
    backend: Arc<dyn StackBackend>,
    object_store: Option<Arc<dyn ObjectStore>>,
    pipeline: AssetPipeline,
    settings: OrchestratorSettings,
}

impl Cluster {
    pub fn new(
        config: ClusterConfig,
        backend: Arc<dyn StackBackend>,
        pipeline: AssetPipeline,
    ) -> Self {
        Self {
            config,
            backend,
            object_store: None,
            pipeline,
            settings: OrchestratorSettings::default(),
        }
    }

    /// Load `cluster.yaml` from `asset_dir`
    pub fn load(
        asset_dir: &Path,
        backend: Arc<dyn StackBackend>,
        pipeline: AssetPipeline,
    ) -> Result<Self, ClusterError> {
        let config = load_cluster_config(&cluster_config_path(asset_dir))?;
        Ok(Self::new(config, backend, pipeline))
    }

    pub fn with_object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.object_store = Some(store);
        self
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn stack_name(&self) -> &str {
        self.config.stack_name()
    }

    /// Generate assets, persist credentials under `asset_dir`, submit the
    /// stack and wait for `CREATE_COMPLETE`. Returns the final state.
    pub async fn create(
        &self,
        asset_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<StackState, ClusterError> {
        let stack = self.stack_name();
        info!(stack = %stack, "Creating cluster");

        let prepared = self.pipeline.prepare(&self.config)?;

        let current = self.describe(cancel).await?;
        if !current.status.is_absent() {
            return Err(ClusterError::Precondition(format!(
                "cluster '{}' already exists (stack status {})",
                stack, current.status
            )));
        }

        prepared.persist(asset_dir).map_err(persist_error)?;

        let template = self.template_source(&prepared, cancel).await?;
        let request = CreateStackRequest {
            name: stack.to_string(),
            template,
            parameters: BTreeMap::from([("KeyName".to_string(), self.config.key_name.clone())]),
            tags: BTreeMap::from([("KubernetesCluster".to_string(), stack.to_string())]),
            client_token: Uuid::new_v4().to_string(),
            disable_rollback: true,
        };

        let stack_id = self
            .call("create_stack", cancel, || self.backend.create_stack(&request))
            .await?;
        info!(stack = %stack, stack_id = %stack_id, "Stack creation submitted");

        let state = self.wait_for(StackOperation::Create, cancel).await?;
        info!(stack = %stack, "Cluster created");
        Ok(state)
    }

    /// Delete the stack and wait until it is gone. An absent stack is
    /// already destroyed.
    pub async fn destroy(&self, cancel: &CancellationToken) -> Result<(), ClusterError> {
        let stack = self.stack_name();
        let current = self.describe(cancel).await?;

        if current.status.is_absent() {
            info!(stack = %stack, status = %current.status, "Stack already absent");
            return Ok(());
        }

        if current.status == StackStatus::Deleting {
            info!(stack = %stack, "Deletion already in progress");
        } else {
            info!(stack = %stack, status = %current.status, "Destroying cluster");
            self.call("delete_stack", cancel, || self.backend.delete_stack(stack))
                .await?;
        }

        self.wait_for(StackOperation::Delete, cancel).await?;
        info!(stack = %stack, "Cluster destroyed");
        Ok(())
    }

    /// Single describe of an existing cluster
    pub async fn info(&self, cancel: &CancellationToken) -> Result<ClusterInfo, ClusterError> {
        let state = self.describe(cancel).await?;
        if state.status.is_absent() {
            return Err(ClusterError::Precondition(format!(
                "cluster '{}' does not exist",
                self.stack_name()
            )));
        }
        Ok(ClusterInfo::from_state(&self.config, &state))
    }

    /// Dry-run the rendered stack template. Nothing is written locally and
    /// no resources are created.
    pub async fn validate_stack(&self, cancel: &CancellationToken) -> StackValidation {
        let prepared = match self.pipeline.prepare(&self.config) {
            Ok(prepared) => prepared,
            Err(e) => {
                return StackValidation {
                    report: String::new(),
                    error: Some(e.into()),
                }
            }
        };

        let template = match self.template_source(&prepared, cancel).await {
            Ok(template) => template,
            Err(e) => {
                return StackValidation {
                    report: String::new(),
                    error: Some(e),
                }
            }
        };

        match self
            .call("validate_template", cancel, || {
                self.backend.validate_template(&template)
            })
            .await
        {
            Ok(report) if report.valid => StackValidation {
                report: report.report,
                error: None,
            },
            Ok(report) => {
                warn!(stack = %self.stack_name(), "Stack template rejected");
                StackValidation {
                    error: Some(ClusterError::TemplateInvalid(report.report.clone())),
                    report: report.report,
                }
            }
            Err(e) => StackValidation {
                report: String::new(),
                error: Some(e),
            },
        }
    }

    // =========================================================================
    // Backend plumbing
    // =========================================================================

    async fn describe(&self, cancel: &CancellationToken) -> Result<StackState, ClusterError> {
        let stack = self.stack_name();
        self.call("describe_stack", cancel, || self.backend.describe_stack(stack))
            .await
    }

    /// One backend call, retried while it fails transiently
    async fn call<T, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        f: F,
    ) -> Result<T, ClusterError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        retry_transient(&self.settings.poll, operation, cancel, f)
            .await
            .map_err(|e| call_error(operation, e))
    }

    /// Inline body, or a URL in object storage when the body is too large
    async fn template_source(
        &self,
        prepared: &PreparedAssets,
        cancel: &CancellationToken,
    ) -> Result<TemplateSource, ClusterError> {
        let body = prepared.stack_template().ok_or_else(|| {
            ClusterError::AssetGeneration(AssetError::InvalidStackTemplate(
                "no stack template was rendered".to_string(),
            ))
        })?;

        let limit = self.settings.max_inline_template_bytes;
        if body.len() <= limit {
            return Ok(TemplateSource::Body(body.to_string()));
        }

        let bucket = self
            .settings
            .template_bucket
            .as_deref()
            .or(self.config.stack_template_bucket.as_deref())
            .ok_or_else(|| {
                ClusterError::Precondition(format!(
                    "stack template is {} bytes, over the {} byte inline limit; set stackTemplateBucket to stage it",
                    body.len(),
                    limit
                ))
            })?;
        let store = self.object_store.as_ref().ok_or_else(|| {
            ClusterError::Precondition(
                "stack template must be staged but no object store is configured".to_string(),
            )
        })?;

        let key = staged_template_key(self.stack_name(), body);
        debug!(bucket = %bucket, key = %key, bytes = body.len(), "Staging stack template");
        let url = self
            .call("put_object", cancel, || {
                store.put(bucket, &key, body.as_bytes().to_vec())
            })
            .await?;
        info!(url = %url, "Stack template staged");
        Ok(TemplateSource::Url(url))
    }

    /// Poll until `operation` reaches its terminal state
    async fn wait_for(
        &self,
        operation: StackOperation,
        cancel: &CancellationToken,
    ) -> Result<StackState, ClusterError> {
        let stack = self.stack_name();
        let last_status: Mutex<Option<StackStatus>> = Mutex::new(None);
        let last_status_ref = &last_status;

        let result = poll_until(&self.settings.poll, operation.verb(), cancel, |attempt| {
            let describe = self.backend.describe_stack(stack);
            async move {
                let state = describe.await.map_err(WaitError::Backend)?;
                if let Ok(mut slot) = last_status_ref.lock() {
                    *slot = Some(state.status);
                }
                info!(stack = %stack, attempt, status = %state.status, "Waiting for stack");
                match classify(operation, state.status) {
                    WaitOutcome::Done => Ok(Progress::Done(state)),
                    WaitOutcome::Waiting => Ok(Progress::Waiting),
                    WaitOutcome::Failed => Err(WaitError::Terminal(state)),
                }
            }
        })
        .await;

        result.map_err(|err| match err {
            RetryError::Fatal(WaitError::Terminal(state)) => ClusterError::terminal(state),
            RetryError::Fatal(WaitError::Backend(source)) => ClusterError::BackendRejected {
                operation: "describe_stack".to_string(),
                source,
            },
            RetryError::Exhausted {
                attempts,
                last_error,
            } => ClusterError::Timeout {
                stack: stack.to_string(),
                operation: operation.verb().to_string(),
                attempts,
                last_status: last_status.lock().ok().and_then(|s| *s),
                last_error: match last_error {
                    Some(WaitError::Backend(e)) => Some(e),
                    _ => None,
                },
            },
            RetryError::Cancelled { .. } => ClusterError::Cancelled {
                operation: format!("{} of stack '{}'", operation.verb(), stack),
            },
        })
    }
}
