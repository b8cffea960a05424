//! In-process stack backend
//!
//! Stacks live in a [`DashMap`] and advance through scripted status
//! sequences, one step per `describe_stack`. Once a script runs out the
//! stack stays at its last status. Failures can be injected ahead of
//! describe, create and validate calls, and every call is counted, so
//! lifecycle code can be driven deterministically without real
//! infrastructure.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use super::{
    BackendError, CreateStackRequest, ObjectStore, StackBackend, StackOutput, StackState,
    StackStatus, TemplateReport, TemplateSource,
};

#[derive(Debug, Clone)]
struct MemoryStack {
    state: StackState,
    pending: VecDeque<StackStatus>,
}

impl MemoryStack {
    fn advance(&mut self) {
        if let Some(next) = self.pending.pop_front() {
            self.state.status = next;
            self.state.status_reason = if next.is_failed() {
                Some(format!("{} (scripted)", next))
            } else {
                None
            };
            self.state.updated_at = Some(Utc::now());
        }
    }
}

/// Simulated [`StackBackend`]
#[derive(Debug, Default)]
pub struct MemoryBackend {
    stacks: DashMap<String, MemoryStack>,
    create_scripts: DashMap<String, Vec<StackStatus>>,
    delete_scripts: DashMap<String, Vec<StackStatus>>,
    outputs: DashMap<String, Vec<StackOutput>>,
    requests: DashMap<String, CreateStackRequest>,
    describe_failures: Mutex<VecDeque<BackendError>>,
    create_failures: Mutex<VecDeque<BackendError>>,
    validate_failures: Mutex<VecDeque<BackendError>>,
    rejections: Mutex<VecDeque<String>>,
    create_calls: AtomicUsize,
    describe_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    validate_calls: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statuses reported by successive describes after `name` is created.
    /// Without a script a created stack completes on the first describe.
    pub fn script_create(&self, name: &str, statuses: Vec<StackStatus>) {
        self.create_scripts.insert(name.to_string(), statuses);
    }

    /// Statuses reported by successive describes after `name` is deleted
    pub fn script_delete(&self, name: &str, statuses: Vec<StackStatus>) {
        self.delete_scripts.insert(name.to_string(), statuses);
    }

    /// Outputs attached to `name` when it is created
    pub fn set_outputs(&self, name: &str, outputs: Vec<(&str, &str)>) {
        let outputs = outputs
            .into_iter()
            .map(|(key, value)| StackOutput {
                key: key.to_string(),
                value: value.to_string(),
            })
            .collect();
        self.outputs.insert(name.to_string(), outputs);
    }

    /// Seed a stack that already exists
    pub fn insert_stack(&self, state: StackState) {
        self.stacks.insert(
            state.name.clone(),
            MemoryStack {
                state,
                pending: VecDeque::new(),
            },
        );
    }

    /// The next `count` describes fail with `error`
    pub fn fail_next_describes(&self, count: usize, error: BackendError) {
        let mut failures = lock(&self.describe_failures);
        failures.extend(std::iter::repeat(error).take(count));
    }

    /// The next create fails with `error`
    pub fn fail_next_create(&self, error: BackendError) {
        lock(&self.create_failures).push_back(error);
    }

    /// The next `count` template validations fail with `error`
    pub fn fail_next_validates(&self, count: usize, error: BackendError) {
        let mut failures = lock(&self.validate_failures);
        failures.extend(std::iter::repeat(error).take(count));
    }

    /// The next template validation reports the template invalid
    pub fn reject_next_template(&self, report: &str) {
        lock(&self.rejections).push_back(report.to_string());
    }

    /// Current state without advancing any script
    pub fn stack(&self, name: &str) -> Option<StackState> {
        self.stacks.get(name).map(|s| s.state.clone())
    }

    /// The last create request submitted for `name`
    pub fn last_create_request(&self, name: &str) -> Option<CreateStackRequest> {
        self.requests.get(name).map(|r| r.clone())
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn describe_calls(&self) -> usize {
        self.describe_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn validate_calls(&self) -> usize {
        self.validate_calls.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl StackBackend for MemoryBackend {
    async fn create_stack(&self, request: &CreateStackRequest) -> Result<String, BackendError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.create_failures).pop_front() {
            return Err(err);
        }

        if let Some(existing) = self.stacks.get(&request.name) {
            if !existing.state.status.is_absent() {
                return Err(BackendError::Rejected {
                    status: 409,
                    message: format!("stack {} already exists", request.name),
                });
            }
        }

        let stack_id = format!("memory:{}:{}", request.name, Uuid::new_v4());
        let pending: VecDeque<StackStatus> = self
            .create_scripts
            .remove(&request.name)
            .map(|(_, script)| script)
            .unwrap_or_else(|| vec![StackStatus::CreateComplete])
            .into();
        let outputs = self
            .outputs
            .get(&request.name)
            .map(|o| o.clone())
            .unwrap_or_default();

        debug!(stack = %request.name, steps = pending.len(), "Simulated stack created");
        self.requests.insert(request.name.clone(), request.clone());
        self.stacks.insert(
            request.name.clone(),
            MemoryStack {
                state: StackState {
                    name: request.name.clone(),
                    stack_id: Some(stack_id.clone()),
                    status: StackStatus::Creating,
                    status_reason: None,
                    outputs,
                    updated_at: Some(Utc::now()),
                },
                pending,
            },
        );
        Ok(stack_id)
    }

    async fn describe_stack(&self, name: &str) -> Result<StackState, BackendError> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.describe_failures).pop_front() {
            return Err(err);
        }

        match self.stacks.get_mut(name) {
            Some(mut stack) => {
                stack.advance();
                Ok(stack.state.clone())
            }
            None => Ok(StackState::not_found(name)),
        }
    }

    async fn delete_stack(&self, name: &str) -> Result<(), BackendError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let Some(mut stack) = self.stacks.get_mut(name) else {
            return Ok(());
        };
        let pending: VecDeque<StackStatus> = self
            .delete_scripts
            .remove(name)
            .map(|(_, script)| script)
            .unwrap_or_else(|| vec![StackStatus::DeleteComplete])
            .into();
        stack.state.status = StackStatus::Deleting;
        stack.state.status_reason = None;
        stack.state.updated_at = Some(Utc::now());
        stack.pending = pending;
        debug!(stack = %name, "Simulated stack deletion started");
        Ok(())
    }

    async fn validate_template(
        &self,
        template: &TemplateSource,
    ) -> Result<TemplateReport, BackendError> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.validate_failures).pop_front() {
            return Err(err);
        }
        if let Some(report) = lock(&self.rejections).pop_front() {
            return Ok(TemplateReport {
                valid: false,
                report,
            });
        }

        let report = match template {
            TemplateSource::Body(body) => {
                match serde_json::from_str::<serde_json::Value>(body) {
                    Ok(serde_json::Value::Object(doc)) if doc.contains_key("Resources") => {
                        TemplateReport {
                            valid: true,
                            report: format!("template declares {} resources", resource_count(&doc)),
                        }
                    }
                    Ok(_) => TemplateReport {
                        valid: false,
                        report: "template has no Resources section".to_string(),
                    },
                    Err(e) => TemplateReport {
                        valid: false,
                        report: format!("template is not valid JSON: {}", e),
                    },
                }
            }
            TemplateSource::Url(url) => TemplateReport {
                valid: true,
                report: format!("template staged at {}", url),
            },
        };
        Ok(report)
    }
}

fn resource_count(doc: &serde_json::Map<String, serde_json::Value>) -> usize {
    doc.get("Resources")
        .and_then(|r| r.as_object())
        .map(|r| r.len())
        .unwrap_or(0)
}

/// Simulated [`ObjectStore`]
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: DashMap<(String, String), Vec<u8>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.clone())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<String, BackendError> {
        self.objects
            .insert((bucket.to_string(), key.to_string()), body);
        Ok(format!("memory://{}/{}", bucket, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn request(name: &str) -> CreateStackRequest {
        CreateStackRequest {
            name: name.to_string(),
            template: TemplateSource::Body(r#"{"Resources": {}}"#.to_string()),
            parameters: BTreeMap::new(),
            tags: BTreeMap::new(),
            client_token: Uuid::new_v4().to_string(),
            disable_rollback: true,
        }
    }

    #[tokio::test]
    async fn test_unknown_stack_is_not_found() {
        let backend = MemoryBackend::new();
        let state = backend.describe_stack("ghost").await.unwrap();
        assert_eq!(state.status, StackStatus::NotFound);
        assert_eq!(backend.describe_calls(), 1);
    }

    #[tokio::test]
    async fn test_scripted_create_then_last_status_repeats() {
        let backend = MemoryBackend::new();
        backend.script_create(
            "demo",
            vec![StackStatus::Creating, StackStatus::CreateComplete],
        );
        backend.set_outputs("demo", vec![("ControllerIP", "10.0.0.50")]);
        backend.create_stack(&request("demo")).await.unwrap();

        let seen: Vec<StackStatus> = vec![
            backend.describe_stack("demo").await.unwrap().status,
            backend.describe_stack("demo").await.unwrap().status,
            backend.describe_stack("demo").await.unwrap().status,
        ];
        assert_eq!(
            seen,
            vec![
                StackStatus::Creating,
                StackStatus::CreateComplete,
                StackStatus::CreateComplete
            ]
        );
        let state = backend.stack("demo").unwrap();
        assert_eq!(state.output("ControllerIP"), Some("10.0.0.50"));
        assert!(state.stack_id.unwrap().starts_with("memory:demo:"));
    }

    #[tokio::test]
    async fn test_failed_status_carries_reason() {
        let backend = MemoryBackend::new();
        backend.script_create("demo", vec![StackStatus::CreateFailed]);
        backend.create_stack(&request("demo")).await.unwrap();
        let state = backend.describe_stack("demo").await.unwrap();
        assert_eq!(state.status, StackStatus::CreateFailed);
        assert!(state.status_reason.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let backend = MemoryBackend::new();
        backend.create_stack(&request("demo")).await.unwrap();
        let err = backend.create_stack(&request("demo")).await.unwrap_err();
        assert!(matches!(err, BackendError::Rejected { status: 409, .. }));
        assert_eq!(backend.create_calls(), 2);
    }

    #[tokio::test]
    async fn test_delete_lifecycle() {
        let backend = MemoryBackend::new();
        backend.create_stack(&request("demo")).await.unwrap();
        backend.script_delete(
            "demo",
            vec![StackStatus::Deleting, StackStatus::DeleteComplete],
        );
        backend.delete_stack("demo").await.unwrap();
        assert_eq!(backend.stack("demo").unwrap().status, StackStatus::Deleting);
        assert_eq!(
            backend.describe_stack("demo").await.unwrap().status,
            StackStatus::Deleting
        );
        assert!(backend
            .describe_stack("demo")
            .await
            .unwrap()
            .status
            .is_absent());
    }

    #[tokio::test]
    async fn test_delete_missing_stack_is_noop() {
        let backend = MemoryBackend::new();
        backend.delete_stack("ghost").await.unwrap();
        assert_eq!(backend.delete_calls(), 1);
        assert!(backend.stack("ghost").is_none());
    }

    #[tokio::test]
    async fn test_injected_describe_failures() {
        let backend = MemoryBackend::new();
        backend.fail_next_describes(2, BackendError::Throttled("Rate exceeded".into()));
        assert!(backend.describe_stack("demo").await.is_err());
        assert!(backend.describe_stack("demo").await.is_err());
        assert!(backend.describe_stack("demo").await.is_ok());
    }

    #[tokio::test]
    async fn test_injected_create_failure() {
        let backend = MemoryBackend::new();
        backend.fail_next_create(BackendError::Unavailable("connection reset".into()));
        assert!(backend.create_stack(&request("demo")).await.is_err());
        assert!(backend.create_stack(&request("demo")).await.is_ok());
        assert!(backend.last_create_request("demo").unwrap().disable_rollback);
    }

    #[tokio::test]
    async fn test_validate_template_body() {
        let backend = MemoryBackend::new();
        let ok = backend
            .validate_template(&TemplateSource::Body(
                r#"{"Resources": {"A": {}, "B": {}}}"#.into(),
            ))
            .await
            .unwrap();
        assert!(ok.valid);
        assert!(ok.report.contains("2 resources"));

        let broken = backend
            .validate_template(&TemplateSource::Body("{not json".into()))
            .await
            .unwrap();
        assert!(!broken.valid);
        assert_eq!(backend.validate_calls(), 2);
    }

    #[tokio::test]
    async fn test_object_store_records_puts() {
        let store = MemoryObjectStore::new();
        assert!(store.is_empty());
        let url = store
            .put("bucket", "demo/stack.json", b"{}".to_vec())
            .await
            .unwrap();
        assert_eq!(url, "memory://bucket/demo/stack.json");
        assert_eq!(store.object("bucket", "demo/stack.json").unwrap(), b"{}");
        assert_eq!(store.len(), 1);
    }
}
