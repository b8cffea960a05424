//! Cluster asset pipeline
//!
//! Turns a validated [`ClusterConfig`] into the material a new cluster
//! boots from: TLS identities from a [`CertificateIssuer`] and the rendered
//! payloads (cloud-configs, stack template, kubeconfig) from a
//! [`TemplateRenderer`]. Any failure aborts the whole pipeline; there is
//! no partial asset set.
//!
//! - [`tls`]: certificate issuance
//! - [`render`]: payload templates

pub mod render;
pub mod tls;

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::ClusterConfig;

pub use render::{MiniJinjaRenderer, TemplateRenderer};
pub use tls::{AssetRequest, CertificateIssuer, RcgenIssuer};

/// Subdirectory of the asset directory holding PEM material
pub const CREDENTIALS_DIR: &str = "credentials";

/// Admin kubeconfig written next to `cluster.yaml`
pub const KUBECONFIG_FILE: &str = "kubeconfig";

/// Errors from certificate issuance, rendering and persistence
#[derive(Error, Debug)]
pub enum AssetError {
    #[error("certificate generation failed: {0}")]
    Certificate(String),

    #[error("failed to render template '{name}': {message}")]
    Template { name: String, message: String },

    #[error("rendered stack template is not valid JSON: {0}")]
    InvalidStackTemplate(String),

    #[error("failed to write assets: {0}")]
    Io(#[from] io::Error),
}

/// A PEM certificate and its private key
#[derive(Clone, PartialEq, Eq)]
pub struct PemPair {
    pub cert: String,
    pub key: String,
}

impl fmt::Debug for PemPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PemPair")
            .field("cert", &format_args!("<{} bytes>", self.cert.len()))
            .field("key", &"<redacted>")
            .finish()
    }
}

/// TLS identities of one cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterAssets {
    pub ca: PemPair,
    pub apiserver: PemPair,
    pub worker: PemPair,
    pub admin: PemPair,
}

impl ClusterAssets {
    /// File name and contents of every credential, keys flagged
    fn credential_files(&self) -> Vec<(&'static str, &str, bool)> {
        vec![
            ("ca.pem", self.ca.cert.as_str(), false),
            ("ca-key.pem", self.ca.key.as_str(), true),
            ("apiserver.pem", self.apiserver.cert.as_str(), false),
            ("apiserver-key.pem", self.apiserver.key.as_str(), true),
            ("worker.pem", self.worker.cert.as_str(), false),
            ("worker-key.pem", self.worker.key.as_str(), true),
            ("admin.pem", self.admin.cert.as_str(), false),
            ("admin-key.pem", self.admin.key.as_str(), true),
        ]
    }
}

/// What a rendered payload is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PayloadRole {
    ControllerUserData,
    WorkerUserData,
    StackTemplate,
    Kubeconfig,
}

/// Output of [`AssetPipeline::prepare`]
#[derive(Debug, Clone)]
pub struct PreparedAssets {
    pub assets: ClusterAssets,
    pub payloads: BTreeMap<PayloadRole, Vec<u8>>,
}

impl PreparedAssets {
    pub fn payload(&self, role: PayloadRole) -> Option<&[u8]> {
        self.payloads.get(&role).map(Vec::as_slice)
    }

    /// The rendered stack template (checked to be JSON, so always UTF-8)
    pub fn stack_template(&self) -> Option<&str> {
        self.payload(PayloadRole::StackTemplate)
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
    }

    /// Write the PEM files under `<asset_dir>/credentials` and the admin
    /// kubeconfig to `<asset_dir>/kubeconfig`. Returns the credentials
    /// directory.
    pub fn persist(&self, asset_dir: &Path) -> Result<PathBuf, AssetError> {
        let dir = credentials_dir(asset_dir);
        fs::create_dir_all(&dir)?;

        for (name, contents, secret) in self.assets.credential_files() {
            let path = dir.join(name);
            write_file(&path, contents.as_bytes(), secret)?;
            debug!(path = %path.display(), "Wrote credential");
        }

        if let Some(kubeconfig) = self.payload(PayloadRole::Kubeconfig) {
            write_file(&asset_dir.join(KUBECONFIG_FILE), kubeconfig, true)?;
        }

        info!(dir = %dir.display(), "Persisted cluster credentials");
        Ok(dir)
    }
}

/// Produces [`PreparedAssets`] from the crypto and template capabilities
#[derive(Clone)]
pub struct AssetPipeline {
    issuer: Arc<dyn CertificateIssuer>,
    renderer: Arc<dyn TemplateRenderer>,
}

impl AssetPipeline {
    pub fn new(issuer: Arc<dyn CertificateIssuer>, renderer: Arc<dyn TemplateRenderer>) -> Self {
        Self { issuer, renderer }
    }

    /// `rcgen` certificates and the built-in templates
    pub fn with_defaults() -> Result<Self, AssetError> {
        Ok(Self::new(
            Arc::new(RcgenIssuer::new()),
            Arc::new(MiniJinjaRenderer::new()?),
        ))
    }

    pub fn renderer(&self) -> &dyn TemplateRenderer {
        self.renderer.as_ref()
    }

    /// Issue identities and render every payload for `config`
    pub fn prepare(&self, config: &ClusterConfig) -> Result<PreparedAssets, AssetError> {
        let request = AssetRequest::for_cluster(config);
        let assets = self.issuer.issue(&request)?;

        let mut vars = template_vars(config, &assets);
        let controller = self
            .renderer
            .render(render::CLOUD_CONFIG_CONTROLLER, &vars)?;
        let worker = self.renderer.render(render::CLOUD_CONFIG_WORKER, &vars)?;

        vars["userDataController"] = json!(STANDARD.encode(&controller));
        vars["userDataWorker"] = json!(STANDARD.encode(&worker));

        let stack_template = self.renderer.render(render::STACK_TEMPLATE, &vars)?;
        serde_json::from_slice::<serde_json::Value>(&stack_template)
            .map_err(|e| AssetError::InvalidStackTemplate(e.to_string()))?;

        let kubeconfig = self.renderer.render(render::KUBECONFIG, &vars)?;

        let payloads = BTreeMap::from([
            (PayloadRole::ControllerUserData, controller),
            (PayloadRole::WorkerUserData, worker),
            (PayloadRole::StackTemplate, stack_template),
            (PayloadRole::Kubeconfig, kubeconfig),
        ]);

        info!(
            cluster = %config.cluster_name,
            payloads = payloads.len(),
            "Prepared cluster assets"
        );
        Ok(PreparedAssets { assets, payloads })
    }
}

// ============================================================================
// SBIO: Template variables (no I/O)
// ============================================================================

/// Variables fed to every payload template
pub fn template_vars(config: &ClusterConfig, assets: &ClusterAssets) -> serde_json::Value {
    let network = &config.network;
    let (vpc_id, route_table_id) = match &config.existing_vpc {
        Some(vpc) => (vpc.vpc_id.as_str(), vpc.route_table_id.as_str()),
        None => ("", ""),
    };
    json!({
        "clusterName": config.cluster_name,
        "externalDNSName": config.external_dns_name,
        "keyName": config.key_name,
        "region": config.region,
        "availabilityZone": config.availability_zone.clone().unwrap_or_default(),
        "releaseChannel": config.release_channel,
        "ami": config.ami.clone().unwrap_or_default(),
        "kubernetesVersion": config.kubernetes_version,
        "controllerInstanceType": config.controller_instance_type,
        "controllerRootVolumeSize": config.controller_root_volume_size,
        "controllerEtcdVolumeSize": config.controller_etcd_volume_size,
        "workerInstanceType": config.worker_instance_type,
        "workerCount": config.worker_count,
        "workerSpotPrice": config.worker_spot_price.clone().unwrap_or_default(),
        "vpcID": vpc_id,
        "routeTableID": route_table_id,
        "vpcCIDR": network.vpc_cidr().to_string(),
        "instanceCIDR": network.instance_cidr().to_string(),
        "controllerIP": network.controller_ip().to_string(),
        "podCIDR": network.pod_cidr().to_string(),
        "serviceCIDR": network.service_cidr().to_string(),
        "kubernetesServiceIP": network.kubernetes_service_ip().to_string(),
        "dnsServiceIP": network.dns_service_ip().to_string(),
        "tls": {
            "caCert": assets.ca.cert,
            "apiserverCert": assets.apiserver.cert,
            "apiserverKey": assets.apiserver.key,
            "workerCert": assets.worker.cert,
            "workerKey": assets.worker.key,
            "adminCert": assets.admin.cert,
            "adminKey": assets.admin.key,
        },
    })
}

// ============================================================================
// SBIO: I/O wrapper - thin layer over pure functions
// ============================================================================

pub fn credentials_dir(asset_dir: &Path) -> PathBuf {
    asset_dir.join(CREDENTIALS_DIR)
}

/// Delete `<asset_dir>/credentials`. Returns false when it did not exist.
pub fn remove_credentials(asset_dir: &Path) -> Result<bool, AssetError> {
    let dir = credentials_dir(asset_dir);
    match fs::remove_dir_all(&dir) {
        Ok(()) => {
            info!(dir = %dir.display(), "Removed cluster credentials");
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Secret files are created owner-only; an existing file keeps its mode,
/// so it is narrowed before being truncated.
#[cfg(unix)]
fn write_file(path: &Path, contents: &[u8], secret: bool) -> Result<(), AssetError> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    if !secret {
        fs::write(path, contents)?;
        return Ok(());
    }
    if path.exists() {
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)?;
    Ok(())
}

#[cfg(not(unix))]
fn write_file(path: &Path, contents: &[u8], _secret: bool) -> Result<(), AssetError> {
    fs::write(path, contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_cluster_config;
    use tempfile::TempDir;

    const CONFIG: &str = "clusterName: demo
externalDNSName: demo.example.com
keyName: ops
region: us-west-1
workerSpotPrice: \"0.05\"
";

    struct FakeIssuer;

    impl CertificateIssuer for FakeIssuer {
        fn issue(&self, request: &AssetRequest) -> Result<ClusterAssets, AssetError> {
            let pair = |role: &str| PemPair {
                cert: format!("CERT {} {}", request.cluster_name, role),
                key: format!("KEY {} {}", request.cluster_name, role),
            };
            Ok(ClusterAssets {
                ca: pair("ca"),
                apiserver: pair("apiserver"),
                worker: pair("worker"),
                admin: pair("admin"),
            })
        }
    }

    struct BrokenIssuer;

    impl CertificateIssuer for BrokenIssuer {
        fn issue(&self, _request: &AssetRequest) -> Result<ClusterAssets, AssetError> {
            Err(AssetError::Certificate("entropy exhausted".to_string()))
        }
    }

    fn pipeline(issuer: Arc<dyn CertificateIssuer>) -> AssetPipeline {
        AssetPipeline::new(issuer, Arc::new(MiniJinjaRenderer::new().unwrap()))
    }

    fn config() -> ClusterConfig {
        parse_cluster_config(CONFIG).unwrap()
    }

    #[test]
    fn test_prepare_renders_every_payload() {
        let prepared = pipeline(Arc::new(FakeIssuer)).prepare(&config()).unwrap();
        assert_eq!(prepared.payloads.len(), 4);

        let controller =
            String::from_utf8(prepared.payload(PayloadRole::ControllerUserData).unwrap().to_vec())
                .unwrap();
        assert!(controller.starts_with("#cloud-config"));
        assert!(controller.contains("DNS_SERVICE_IP=10.3.0.10"));
        assert!(controller.contains(&STANDARD.encode("CERT demo apiserver")));
    }

    #[test]
    fn test_stack_template_embeds_user_data() {
        let prepared = pipeline(Arc::new(FakeIssuer)).prepare(&config()).unwrap();
        let template: serde_json::Value =
            serde_json::from_str(prepared.stack_template().unwrap()).unwrap();

        let worker = prepared.payload(PayloadRole::WorkerUserData).unwrap();
        assert_eq!(
            template["Resources"]["LaunchConfigurationWorker"]["Properties"]["UserData"],
            json!(STANDARD.encode(worker))
        );
        assert_eq!(
            template["Resources"]["LaunchConfigurationWorker"]["Properties"]["SpotPrice"],
            json!("0.05")
        );
        assert_eq!(template["Outputs"]["ControllerIP"]["Value"], json!("10.0.0.50"));
        assert!(template["Resources"]["Subnet"]["Properties"]
            .get("AvailabilityZone")
            .is_none());
    }

    #[test]
    fn test_stack_template_escapes_user_strings() {
        let content = format!(
            "{}keyName: 'ops \"laptop\"'\nworkerSpotPrice: '0.05\", \"ImageId\": \"ami-evil'\n",
            "clusterName: demo\nexternalDNSName: demo.example.com\nregion: us-west-1\n"
        );
        let config = parse_cluster_config(&content).unwrap();
        let prepared = pipeline(Arc::new(FakeIssuer)).prepare(&config).unwrap();
        let template: serde_json::Value =
            serde_json::from_str(prepared.stack_template().unwrap()).unwrap();

        assert_eq!(
            template["Parameters"]["KeyName"]["Default"],
            json!("ops \"laptop\"")
        );
        let launch = &template["Resources"]["LaunchConfigurationWorker"]["Properties"];
        assert_eq!(launch["SpotPrice"], json!("0.05\", \"ImageId\": \"ami-evil"));
        assert_eq!(launch["ImageId"], json!({ "Ref": "ImageId" }));
    }

    #[test]
    fn test_stack_template_creates_vpc_and_release_channel_image() {
        let prepared = pipeline(Arc::new(FakeIssuer)).prepare(&config()).unwrap();
        let template: serde_json::Value =
            serde_json::from_str(prepared.stack_template().unwrap()).unwrap();

        let resources = &template["Resources"];
        assert_eq!(resources["VPC"]["Properties"]["CidrBlock"], json!("10.0.0.0/16"));
        assert_eq!(
            resources["SubnetRouteTableAssociation"]["Properties"]["RouteTableId"],
            json!({ "Ref": "RouteTable" })
        );
        assert_eq!(
            template["Parameters"]["ImageId"]["Default"],
            json!("/kubestack/images/alpha")
        );
        let volumes = &resources["InstanceController"]["Properties"]["BlockDeviceMappings"];
        assert_eq!(volumes[1]["DeviceName"], json!("/dev/xvdf"));
        assert_eq!(volumes[1]["Ebs"]["VolumeSize"], json!(30));
        assert_eq!(resources["AutoScaleWorker"]["Properties"]["MinSize"], json!("1"));
    }

    #[test]
    fn test_stack_template_reuses_existing_vpc() {
        let content = format!(
            "{}ami: ami-1234\ncontrollerEtcdVolumeSize: 80\nexistingVPC:\n  vpcID: vpc-0abc\n  routeTableID: rtb-0def\n",
            CONFIG
        );
        let config = parse_cluster_config(&content).unwrap();
        let prepared = pipeline(Arc::new(FakeIssuer)).prepare(&config).unwrap();
        let template: serde_json::Value =
            serde_json::from_str(prepared.stack_template().unwrap()).unwrap();

        let resources = &template["Resources"];
        assert!(resources.get("VPC").is_none());
        assert!(resources.get("InternetGateway").is_none());
        assert_eq!(resources["Subnet"]["Properties"]["VpcId"], json!("vpc-0abc"));
        assert_eq!(
            resources["SubnetRouteTableAssociation"]["Properties"]["RouteTableId"],
            json!("rtb-0def")
        );
        assert_eq!(template["Parameters"]["ImageId"]["Default"], json!("ami-1234"));
        assert_eq!(
            resources["InstanceController"]["Properties"]["BlockDeviceMappings"][1]["Ebs"]
                ["VolumeSize"],
            json!(80)
        );
    }

    #[test]
    fn test_issuer_failure_aborts() {
        let result = pipeline(Arc::new(BrokenIssuer)).prepare(&config());
        assert!(matches!(result, Err(AssetError::Certificate(_))));
    }

    #[test]
    fn test_pem_pair_debug_hides_key() {
        let pair = PemPair {
            cert: "CERT".to_string(),
            key: "SECRET".to_string(),
        };
        let debug = format!("{:?}", pair);
        assert!(!debug.contains("SECRET"));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn test_persist_writes_credentials_and_kubeconfig() {
        let dir = TempDir::new().unwrap();
        let prepared = pipeline(Arc::new(FakeIssuer)).prepare(&config()).unwrap();
        let creds = prepared.persist(dir.path()).unwrap();

        assert_eq!(creds, dir.path().join("credentials"));
        for name in [
            "ca.pem",
            "ca-key.pem",
            "apiserver.pem",
            "apiserver-key.pem",
            "worker.pem",
            "worker-key.pem",
            "admin.pem",
            "admin-key.pem",
        ] {
            assert!(creds.join(name).is_file(), "{} missing", name);
        }
        assert_eq!(
            fs::read_to_string(creds.join("worker-key.pem")).unwrap(),
            "KEY demo worker"
        );
        let kubeconfig = fs::read_to_string(dir.path().join("kubeconfig")).unwrap();
        assert!(kubeconfig.contains("server: https://demo.example.com"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(creds.join("ca-key.pem")).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_rewriting_a_key_narrows_its_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("admin-key.pem");
        fs::write(&path, "old").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        write_file(&path, b"new", true).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_remove_credentials() {
        let dir = TempDir::new().unwrap();
        assert!(!remove_credentials(dir.path()).unwrap());
        fs::create_dir_all(credentials_dir(dir.path())).unwrap();
        assert!(remove_credentials(dir.path()).unwrap());
        assert!(!credentials_dir(dir.path()).exists());
    }
}
