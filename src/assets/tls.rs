//! TLS identities for cluster nodes
//!
//! A cluster gets its own self-signed CA. The CA signs three leaf
//! certificates: the API server certificate presented by the controller,
//! the worker certificate used by kubelets, and an admin client
//! certificate for the operator's kubeconfig. Nothing is reused across
//! clusters.

use std::net::{IpAddr, Ipv4Addr};

use chrono::{Datelike, Utc};
use rcgen::{
    date_time_ymd, string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName,
    DnType, DnValue, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use tracing::debug;

use super::{AssetError, ClusterAssets, PemPair};
use crate::config::ClusterConfig;

/// CA certificate lifetime
pub const CA_VALIDITY_YEARS: i32 = 10;

/// Leaf certificate lifetime
pub const CERT_VALIDITY_YEARS: i32 = 1;

const ORGANIZATION: &str = "kubestack";

/// In-cluster names of the API server service
const KUBERNETES_SERVICE_NAMES: [&str; 4] = [
    "kubernetes",
    "kubernetes.default",
    "kubernetes.default.svc",
    "kubernetes.default.svc.cluster.local",
];

/// Input to the crypto capability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRequest {
    pub cluster_name: String,
    /// Name clients use to reach the API server
    pub controller_endpoint: String,
    pub controller_ip: Ipv4Addr,
    /// Subject alternative names for the API server certificate
    pub sans: Vec<String>,
}

impl AssetRequest {
    /// Request for a validated cluster: external DNS name, controller IP,
    /// Kubernetes service IP and the in-cluster service names
    pub fn for_cluster(config: &ClusterConfig) -> Self {
        let network = &config.network;
        let mut sans = vec![
            config.external_dns_name.clone(),
            network.controller_ip().to_string(),
            network.kubernetes_service_ip().to_string(),
        ];
        sans.extend(KUBERNETES_SERVICE_NAMES.iter().map(|s| s.to_string()));
        sans.dedup();

        Self {
            cluster_name: config.cluster_name.clone(),
            controller_endpoint: config.external_dns_name.clone(),
            controller_ip: network.controller_ip(),
            sans,
        }
    }
}

/// Crypto capability producing the TLS identities of one cluster
pub trait CertificateIssuer: Send + Sync {
    fn issue(&self, request: &AssetRequest) -> Result<ClusterAssets, AssetError>;
}

/// [`CertificateIssuer`] backed by `rcgen`
#[derive(Debug, Clone, Default)]
pub struct RcgenIssuer;

impl RcgenIssuer {
    pub fn new() -> Self {
        Self
    }
}

impl CertificateIssuer for RcgenIssuer {
    fn issue(&self, request: &AssetRequest) -> Result<ClusterAssets, AssetError> {
        debug!(
            cluster = %request.cluster_name,
            sans = request.sans.len(),
            "Issuing cluster certificates"
        );

        let ca_key = generate_key("CA")?;
        let ca = ca_params(&request.cluster_name)
            .self_signed(&ca_key)
            .map_err(|e| AssetError::Certificate(format!("failed to create CA cert: {}", e)))?;
        let ca_cert_pem = ca.pem();
        let issuer = Issuer::from_ca_cert_pem(&ca_cert_pem, &ca_key)
            .map_err(|e| AssetError::Certificate(format!("failed to create issuer: {}", e)))?;

        let apiserver = {
            let mut params = leaf_params("kube-apiserver", CERT_VALIDITY_YEARS);
            params.extended_key_usages = vec![
                ExtendedKeyUsagePurpose::ServerAuth,
                ExtendedKeyUsagePurpose::ClientAuth,
            ];
            params.subject_alt_names = subject_alt_names(&request.sans)?;
            sign(params, &issuer, "apiserver")?
        };

        let worker = {
            let mut params = leaf_params("kube-worker", CERT_VALIDITY_YEARS);
            params.extended_key_usages = vec![
                ExtendedKeyUsagePurpose::ServerAuth,
                ExtendedKeyUsagePurpose::ClientAuth,
            ];
            sign(params, &issuer, "worker")?
        };

        let admin = {
            let mut params = leaf_params("kube-admin", CERT_VALIDITY_YEARS);
            params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
            sign(params, &issuer, "admin")?
        };

        Ok(ClusterAssets {
            ca: PemPair {
                cert: ca_cert_pem,
                key: ca_key.serialize_pem(),
            },
            apiserver,
            worker,
            admin,
        })
    }
}

// ============================================================================
// SBIO: Certificate parameters (no I/O)
// ============================================================================

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(common_name.to_string()));
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String(ORGANIZATION.to_string()),
    );
    dn
}

/// Validity window starting today
fn set_validity(params: &mut CertificateParams, years: i32) {
    let today = Utc::now().date_naive();
    // Clamped to the 28th so the expiry date exists in every year
    let month = today.month() as u8;
    let day = today.day().min(28) as u8;
    params.not_before = date_time_ymd(today.year(), month, day);
    params.not_after = date_time_ymd(today.year() + years, month, day);
}

fn ca_params(cluster_name: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(&format!("kube-ca-{}", cluster_name));
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    set_validity(&mut params, CA_VALIDITY_YEARS);
    params
}

fn leaf_params(common_name: &str, years: i32) -> CertificateParams {
    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(common_name);
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    set_validity(&mut params, years);
    params
}

/// IP literals become IP SANs, everything else a DNS SAN
fn subject_alt_names(sans: &[String]) -> Result<Vec<SanType>, AssetError> {
    sans.iter()
        .map(|san| {
            if let Ok(ip) = san.parse::<IpAddr>() {
                Ok(SanType::IpAddress(ip))
            } else {
                Ia5String::try_from(san.clone())
                    .map(SanType::DnsName)
                    .map_err(|e| {
                        AssetError::Certificate(format!("invalid DNS name '{}': {}", san, e))
                    })
            }
        })
        .collect()
}

fn generate_key(role: &str) -> Result<KeyPair, AssetError> {
    KeyPair::generate()
        .map_err(|e| AssetError::Certificate(format!("failed to generate {} key: {}", role, e)))
}

fn sign(
    params: CertificateParams,
    issuer: &Issuer<'_, &KeyPair>,
    role: &str,
) -> Result<PemPair, AssetError> {
    let key = generate_key(role)?;
    let cert = params
        .signed_by(&key, issuer)
        .map_err(|e| AssetError::Certificate(format!("failed to sign {} cert: {}", role, e)))?;
    Ok(PemPair {
        cert: cert.pem(),
        key: key.serialize_pem(),
    })
}
