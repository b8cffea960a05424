//! Cluster configuration file
//!
//! `cluster.yaml` is parsed into a [`RawClusterConfig`] (unknown keys are
//! ignored so newer files still load) and then validated into an immutable
//! [`ClusterConfig`] that carries the derived network plan.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::network::{self, ClusterNetworkConfig, RawNetworkConfig, ValidationError};

/// File name of the cluster configuration inside an asset directory
pub const CLUSTER_CONFIG_FILE: &str = "cluster.yaml";

pub const DEFAULT_RELEASE_CHANNEL: &str = "alpha";
pub const DEFAULT_KUBERNETES_VERSION: &str = "v1.1.7";
pub const DEFAULT_INSTANCE_TYPE: &str = "m3.medium";
pub const DEFAULT_ROOT_VOLUME_SIZE_GB: u32 = 30;
pub const DEFAULT_ETCD_VOLUME_SIZE_GB: u32 = 30;
pub const DEFAULT_WORKER_COUNT: u32 = 1;

/// Errors for loading and validating cluster configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse cluster config: {0}")]
    ParseError(String),

    #[error("Missing required setting '{0}'")]
    MissingField(&'static str),

    #[error("Invalid cluster name '{0}': must start with a letter and contain only letters, digits and '-'")]
    InvalidClusterName(String),

    #[error("Invalid setting '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error(transparent)]
    Network(#[from] ValidationError),
}

/// An existing VPC to deploy into instead of creating one. `vpcCIDR`
/// must match the VPC's own CIDR.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingVpc {
    #[serde(rename = "vpcID", alias = "vpcId", default)]
    pub vpc_id: String,
    /// Route table the new cluster subnet is associated with
    #[serde(rename = "routeTableID", alias = "routeTableId", default)]
    pub route_table_id: String,
}

/// Cluster settings exactly as written in `cluster.yaml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawClusterConfig {
    #[serde(default)]
    pub cluster_name: String,
    #[serde(rename = "externalDNSName", default)]
    pub external_dns_name: String,
    #[serde(default)]
    pub key_name: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub availability_zone: Option<String>,

    #[serde(default)]
    pub release_channel: Option<String>,
    /// Machine image; overrides the release channel's image
    #[serde(default)]
    pub ami: Option<String>,
    #[serde(default)]
    pub kubernetes_version: Option<String>,
    #[serde(default)]
    pub controller_instance_type: Option<String>,
    #[serde(default)]
    pub controller_root_volume_size: Option<u32>,
    #[serde(default)]
    pub controller_etcd_volume_size: Option<u32>,
    #[serde(default)]
    pub worker_instance_type: Option<String>,
    #[serde(default)]
    pub worker_count: Option<u32>,
    #[serde(default)]
    pub worker_spot_price: Option<String>,
    #[serde(default)]
    pub stack_template_bucket: Option<String>,
    #[serde(rename = "existingVPC", alias = "existingVpc", default)]
    pub existing_vpc: Option<ExistingVpc>,

    #[serde(rename = "vpcCIDR", default)]
    pub vpc_cidr: Option<String>,
    #[serde(rename = "instanceCIDR", default)]
    pub instance_cidr: Option<String>,
    #[serde(rename = "controllerIP", default)]
    pub controller_ip: Option<String>,
    #[serde(rename = "podCIDR", default)]
    pub pod_cidr: Option<String>,
    #[serde(rename = "serviceCIDR", default)]
    pub service_cidr: Option<String>,
    #[serde(rename = "kubernetesServiceIP", default)]
    pub kubernetes_service_ip: Option<String>,
    #[serde(rename = "dnsServiceIP", default)]
    pub dns_service_ip: Option<String>,
}

impl RawClusterConfig {
    /// The network-related keys of the file
    pub fn network(&self) -> RawNetworkConfig {
        RawNetworkConfig {
            vpc_cidr: self.vpc_cidr.clone(),
            instance_cidr: self.instance_cidr.clone(),
            controller_ip: self.controller_ip.clone(),
            pod_cidr: self.pod_cidr.clone(),
            service_cidr: self.service_cidr.clone(),
            kubernetes_service_ip: self.kubernetes_service_ip.clone(),
            dns_service_ip: self.dns_service_ip.clone(),
        }
    }
}

/// A fully validated cluster configuration
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    pub cluster_name: String,
    #[serde(rename = "externalDNSName")]
    pub external_dns_name: String,
    pub key_name: String,
    pub region: String,
    pub availability_zone: Option<String>,
    pub release_channel: String,
    pub ami: Option<String>,
    pub kubernetes_version: String,
    pub controller_instance_type: String,
    pub controller_root_volume_size: u32,
    pub controller_etcd_volume_size: u32,
    pub worker_instance_type: String,
    pub worker_count: u32,
    pub worker_spot_price: Option<String>,
    pub stack_template_bucket: Option<String>,
    #[serde(rename = "existingVPC")]
    pub existing_vpc: Option<ExistingVpc>,
    pub network: ClusterNetworkConfig,
}

impl ClusterConfig {
    /// Name of the infrastructure stack backing this cluster
    pub fn stack_name(&self) -> &str {
        &self.cluster_name
    }
}

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

fn is_valid_cluster_name(name: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[a-zA-Z][-a-zA-Z0-9]*$").ok())
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(name))
}

fn required(value: &str, field: &'static str) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::MissingField(field));
    }
    Ok(trimmed.to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn or_default(value: Option<String>, default: &str) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Validate raw settings, fill defaults and derive the network plan
pub fn validate_cluster_config(raw: RawClusterConfig) -> Result<ClusterConfig, ConfigError> {
    let cluster_name = required(&raw.cluster_name, "clusterName")?;
    if !is_valid_cluster_name(&cluster_name) {
        return Err(ConfigError::InvalidClusterName(cluster_name));
    }
    let external_dns_name = required(&raw.external_dns_name, "externalDNSName")?;
    let key_name = required(&raw.key_name, "keyName")?;
    let region = required(&raw.region, "region")?;

    let worker_count = raw.worker_count.unwrap_or(DEFAULT_WORKER_COUNT);
    if worker_count == 0 {
        return Err(ConfigError::InvalidValue {
            field: "workerCount",
            reason: "at least one worker is required".to_string(),
        });
    }

    let controller_root_volume_size = raw
        .controller_root_volume_size
        .unwrap_or(DEFAULT_ROOT_VOLUME_SIZE_GB);
    if controller_root_volume_size == 0 {
        return Err(ConfigError::InvalidValue {
            field: "controllerRootVolumeSize",
            reason: "volume size must be positive".to_string(),
        });
    }

    let controller_etcd_volume_size = raw
        .controller_etcd_volume_size
        .unwrap_or(DEFAULT_ETCD_VOLUME_SIZE_GB);
    if controller_etcd_volume_size == 0 {
        return Err(ConfigError::InvalidValue {
            field: "controllerEtcdVolumeSize",
            reason: "volume size must be positive".to_string(),
        });
    }

    let existing_vpc = match raw.existing_vpc {
        Some(ref vpc) => Some(ExistingVpc {
            vpc_id: required(&vpc.vpc_id, "existingVPC.vpcID")?,
            route_table_id: required(&vpc.route_table_id, "existingVPC.routeTableID")?,
        }),
        None => None,
    };

    let network = network::validate(&raw.network())?;

    Ok(ClusterConfig {
        cluster_name,
        external_dns_name,
        key_name,
        region,
        availability_zone: raw.availability_zone.filter(|z| !z.trim().is_empty()),
        release_channel: or_default(raw.release_channel, DEFAULT_RELEASE_CHANNEL),
        ami: non_empty(raw.ami),
        kubernetes_version: or_default(raw.kubernetes_version, DEFAULT_KUBERNETES_VERSION),
        controller_instance_type: or_default(raw.controller_instance_type, DEFAULT_INSTANCE_TYPE),
        controller_root_volume_size,
        controller_etcd_volume_size,
        worker_instance_type: or_default(raw.worker_instance_type, DEFAULT_INSTANCE_TYPE),
        worker_count,
        worker_spot_price: raw.worker_spot_price.filter(|p| !p.trim().is_empty()),
        stack_template_bucket: raw.stack_template_bucket.filter(|b| !b.trim().is_empty()),
        existing_vpc,
        network,
    })
}

/// Parse and validate cluster configuration from YAML text
pub fn parse_cluster_config(content: &str) -> Result<ClusterConfig, ConfigError> {
    let raw: RawClusterConfig =
        serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_cluster_config(raw)
}

// ============================================================================
// SBIO: I/O wrapper - thin layer over pure functions
// ============================================================================

/// Location of `cluster.yaml` inside an asset directory
pub fn cluster_config_path(asset_dir: &Path) -> PathBuf {
    asset_dir.join(CLUSTER_CONFIG_FILE)
}

/// Load and validate a cluster configuration file from disk
pub fn load_cluster_config(path: &Path) -> Result<ClusterConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_cluster_config(&content)
}
