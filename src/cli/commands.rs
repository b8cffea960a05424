//! Command implementations for the CLI
//!
//! SBIO pattern: Commands return Results, I/O is handled by caller

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{InitArgs, API_TOKEN_ENV, ENDPOINT_ENV};
use crate::assets::{
    self, render, AssetError, AssetPipeline, MiniJinjaRenderer, TemplateRenderer,
};
use crate::backend::{
    BackendError, HttpBackendConfig, HttpObjectStore, HttpStackBackend, ObjectStore, StackBackend,
};
use crate::cluster::{Cluster, ClusterError, ClusterInfo, OrchestratorSettings, StackValidation};
use crate::config::{
    cluster_config_path, load_cluster_config, parse_cluster_config, ClusterConfig, ConfigError,
};

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{} already exists, refusing to overwrite", .0.display())]
    AlreadyExists(PathBuf),

    #[error("No stack service endpoint: pass --endpoint or set {}", ENDPOINT_ENV)]
    NoEndpoint,
}

/// Result type for commands
pub type CommandResult<T> = Result<T, CommandError>;

/// Everything a command needs besides its own arguments
#[derive(Clone)]
pub struct CommandContext {
    pub asset_dir: PathBuf,
    pub endpoint: Option<String>,
    pub api_token: Option<String>,
    pub settings: OrchestratorSettings,
    backend: Option<(Arc<dyn StackBackend>, Arc<dyn ObjectStore>)>,
}

impl CommandContext {
    /// `~` in the asset directory is expanded. Endpoint and token fall back
    /// to the environment, which may have been filled from `--env-file`
    /// after argument parsing.
    pub fn new(asset_dir: &str, endpoint: Option<String>, api_token: Option<String>) -> Self {
        let asset_dir = PathBuf::from(shellexpand::tilde(asset_dir).into_owned());
        let non_empty = |v: String| if v.trim().is_empty() { None } else { Some(v) };
        Self {
            asset_dir,
            endpoint: endpoint
                .or_else(|| std::env::var(ENDPOINT_ENV).ok())
                .and_then(non_empty),
            api_token: api_token
                .or_else(|| std::env::var(API_TOKEN_ENV).ok())
                .and_then(non_empty),
            settings: OrchestratorSettings::default(),
            backend: None,
        }
    }

    /// Use the given backend instead of the HTTP stack service
    pub fn with_backend(
        mut self,
        backend: Arc<dyn StackBackend>,
        object_store: Arc<dyn ObjectStore>,
    ) -> Self {
        self.backend = Some((backend, object_store));
        self
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn config_path(&self) -> PathBuf {
        cluster_config_path(&self.asset_dir)
    }

    fn backend(&self) -> CommandResult<(Arc<dyn StackBackend>, Arc<dyn ObjectStore>)> {
        if let Some((backend, store)) = &self.backend {
            return Ok((backend.clone(), store.clone()));
        }
        let endpoint = self.endpoint.clone().ok_or(CommandError::NoEndpoint)?;
        let mut config = HttpBackendConfig::new(endpoint);
        if let Some(ref token) = self.api_token {
            config = config.with_api_token(token.clone());
        }
        Ok((
            Arc::new(HttpStackBackend::new(config.clone())?),
            Arc::new(HttpObjectStore::new(config)?),
        ))
    }

    /// Load the cluster file and wire up the orchestrator
    pub fn cluster(&self) -> CommandResult<Cluster> {
        let (backend, store) = self.backend()?;
        Ok(Cluster::load(&self.asset_dir, backend, AssetPipeline::with_defaults()?)?
            .with_object_store(store)
            .with_settings(self.settings.clone()))
    }
}

// ============================================================================
// Local commands (no backend access)
// ============================================================================

/// Render the starter cluster file for `args`
pub fn render_initial_config(
    renderer: &dyn TemplateRenderer,
    args: &InitArgs,
) -> CommandResult<String> {
    let vars = json!({
        "clusterName": args.cluster_name,
        "externalDNSName": args.external_dns_name,
        "keyName": args.key_name,
        "region": args.region,
        "availabilityZone": args.availability_zone.clone().unwrap_or_default(),
    });
    let bytes = renderer.render(render::CLUSTER_CONFIG, &vars)?;
    String::from_utf8(bytes).map_err(|e| {
        CommandError::Asset(AssetError::Template {
            name: render::CLUSTER_CONFIG.to_string(),
            message: e.to_string(),
        })
    })
}

/// Write a starter `cluster.yaml`; never overwrites an existing one
pub fn init(ctx: &CommandContext, args: &InitArgs) -> CommandResult<PathBuf> {
    let path = ctx.config_path();
    if path.exists() {
        return Err(CommandError::AlreadyExists(path));
    }

    let content = render_initial_config(&MiniJinjaRenderer::new()?, args)?;
    // Reject bad names before anything touches the disk
    parse_cluster_config(&content)?;

    std::fs::create_dir_all(&ctx.asset_dir)?;
    std::fs::write(&path, content)?;
    info!(path = %path.display(), "Wrote cluster config");
    Ok(path)
}

/// Load and validate the cluster file
pub fn plan(ctx: &CommandContext) -> CommandResult<ClusterConfig> {
    Ok(load_cluster_config(&ctx.config_path())?)
}

// ============================================================================
// Backend commands
// ============================================================================

/// Dry-run the stack template. Loading errors surface as the validation's
/// error so the caller has one place to look.
pub async fn validate(ctx: &CommandContext, cancel: &CancellationToken) -> StackValidation {
    match ctx.cluster() {
        Ok(cluster) => cluster.validate_stack(cancel).await,
        Err(CommandError::Cluster(e)) => StackValidation {
            report: String::new(),
            error: Some(e),
        },
        Err(CommandError::Config(e)) => StackValidation {
            report: String::new(),
            error: Some(ClusterError::Config(e)),
        },
        Err(CommandError::Asset(e)) => StackValidation {
            report: String::new(),
            error: Some(ClusterError::AssetGeneration(e)),
        },
        Err(other) => StackValidation {
            report: String::new(),
            error: Some(ClusterError::Precondition(other.to_string())),
        },
    }
}

/// Create the cluster and summarise the result
pub async fn up(ctx: &CommandContext, cancel: &CancellationToken) -> CommandResult<ClusterInfo> {
    let cluster = ctx.cluster()?;
    let state = cluster.create(&ctx.asset_dir, cancel).await?;
    Ok(ClusterInfo::from_state(cluster.config(), &state))
}

pub async fn status(
    ctx: &CommandContext,
    cancel: &CancellationToken,
) -> CommandResult<ClusterInfo> {
    Ok(ctx.cluster()?.info(cancel).await?)
}

/// Destroy the stack, then delete local credentials. Returns whether a
/// credentials directory was removed.
pub async fn destroy(ctx: &CommandContext, cancel: &CancellationToken) -> CommandResult<bool> {
    ctx.cluster()?.destroy(cancel).await?;
    Ok(assets::remove_credentials(&ctx.asset_dir)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, MemoryObjectStore, StackStatus};
    use crate::retry::PollPolicy;
    use std::time::Duration;
    use tempfile::TempDir;

    fn init_args(name: &str) -> InitArgs {
        InitArgs {
            cluster_name: name.to_string(),
            external_dns_name: "demo.example.com".to_string(),
            key_name: "ops".to_string(),
            region: "us-west-1".to_string(),
            availability_zone: Some("us-west-1c".to_string()),
        }
    }

    fn context(dir: &TempDir, backend: Arc<MemoryBackend>) -> CommandContext {
        CommandContext::new(dir.path().to_str().unwrap(), None, None)
            .with_backend(backend, Arc::new(MemoryObjectStore::new()))
            .with_settings(OrchestratorSettings {
                poll: PollPolicy::new(5, Duration::from_millis(1)),
                ..OrchestratorSettings::default()
            })
    }

    #[test]
    fn test_context_expands_tilde() {
        let ctx = CommandContext::new("~/clusters", Some("http://x".into()), None);
        assert!(!ctx.asset_dir.to_string_lossy().starts_with('~'));
        assert_eq!(ctx.endpoint.as_deref(), Some("http://x"));
    }

    #[test]
    fn test_init_writes_loadable_config() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, Arc::new(MemoryBackend::new()));
        let path = init(&ctx, &init_args("demo")).unwrap();
        assert_eq!(path, dir.path().join("cluster.yaml"));

        let config = plan(&ctx).unwrap();
        assert_eq!(config.cluster_name, "demo");
        assert_eq!(config.availability_zone.as_deref(), Some("us-west-1c"));
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, Arc::new(MemoryBackend::new()));
        init(&ctx, &init_args("demo")).unwrap();
        let err = init(&ctx, &init_args("other")).unwrap_err();
        assert!(matches!(err, CommandError::AlreadyExists(_)));
    }

    #[test]
    fn test_init_rejects_bad_name() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, Arc::new(MemoryBackend::new()));
        let err = init(&ctx, &init_args("9lives")).unwrap_err();
        assert!(matches!(
            err,
            CommandError::Config(ConfigError::InvalidClusterName(_))
        ));
        assert!(!ctx.config_path().exists());
    }

    #[test]
    fn test_plan_without_config() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, Arc::new(MemoryBackend::new()));
        assert!(matches!(
            plan(&ctx),
            Err(CommandError::Config(ConfigError::IoError(_)))
        ));
    }

    #[test]
    fn test_http_backend_needs_endpoint() {
        let dir = TempDir::new().unwrap();
        let mut ctx = CommandContext::new(dir.path().to_str().unwrap(), None, None);
        ctx.endpoint = None;
        init(&ctx, &init_args("demo")).unwrap();
        assert!(matches!(ctx.cluster(), Err(CommandError::NoEndpoint)));
    }

    #[tokio::test]
    async fn test_up_status_destroy() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(MemoryBackend::new());
        let ctx = context(&dir, backend.clone());
        let cancel = CancellationToken::new();
        init(&ctx, &init_args("demo")).unwrap();

        backend.script_create("demo", vec![StackStatus::Creating, StackStatus::CreateComplete]);
        let info = up(&ctx, &cancel).await.unwrap();
        assert_eq!(info.name, "demo");
        assert_eq!(info.status, StackStatus::CreateComplete);
        assert!(dir.path().join("credentials/ca.pem").is_file());

        let info = status(&ctx, &cancel).await.unwrap();
        assert_eq!(info.controller_ip, "10.0.0.50");

        assert!(destroy(&ctx, &cancel).await.unwrap());
        assert!(!dir.path().join("credentials").exists());
        assert_eq!(backend.delete_calls(), 1);
    }

    #[tokio::test]
    async fn test_validate_reports_missing_config() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, Arc::new(MemoryBackend::new()));
        let result = validate(&ctx, &CancellationToken::new()).await;
        assert!(matches!(result.error, Some(ClusterError::Config(_))));
    }
}
