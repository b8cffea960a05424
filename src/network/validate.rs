//! Network plan validation and derivation
//!
//! Turns the raw, partially-specified address settings of a cluster into a
//! complete [`ClusterNetworkConfig`]. Absent fields take the built-in
//! defaults first; every field is then checked the same way regardless of
//! where it came from. All rules run on every call and failures accumulate,
//! so one call reports every violated rule at once.

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::cidr::{parse_ip, CidrBlock};

pub const DEFAULT_VPC_CIDR: &str = "10.0.0.0/16";
pub const DEFAULT_INSTANCE_CIDR: &str = "10.0.0.0/24";
pub const DEFAULT_CONTROLLER_IP: &str = "10.0.0.50";
pub const DEFAULT_POD_CIDR: &str = "10.2.0.0/16";
pub const DEFAULT_SERVICE_CIDR: &str = "10.3.0.0/24";
pub const DEFAULT_DNS_SERVICE_IP: &str = "10.3.0.10";

/// Network settings as written by the user; `None` means "use the default"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawNetworkConfig {
    #[serde(rename = "vpcCIDR", default, skip_serializing_if = "Option::is_none")]
    pub vpc_cidr: Option<String>,
    #[serde(rename = "instanceCIDR", default, skip_serializing_if = "Option::is_none")]
    pub instance_cidr: Option<String>,
    #[serde(rename = "controllerIP", default, skip_serializing_if = "Option::is_none")]
    pub controller_ip: Option<String>,
    #[serde(rename = "podCIDR", default, skip_serializing_if = "Option::is_none")]
    pub pod_cidr: Option<String>,
    #[serde(rename = "serviceCIDR", default, skip_serializing_if = "Option::is_none")]
    pub service_cidr: Option<String>,
    #[serde(rename = "kubernetesServiceIP", default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_service_ip: Option<String>,
    #[serde(rename = "dnsServiceIP", default, skip_serializing_if = "Option::is_none")]
    pub dns_service_ip: Option<String>,
}

/// A validated address plan. Every invariant holds; fields cannot be
/// changed after construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetworkConfig {
    #[serde(rename = "vpcCIDR")]
    vpc_cidr: CidrBlock,
    #[serde(rename = "instanceCIDR")]
    instance_cidr: CidrBlock,
    #[serde(rename = "controllerIP")]
    controller_ip: Ipv4Addr,
    #[serde(rename = "podCIDR")]
    pod_cidr: CidrBlock,
    #[serde(rename = "serviceCIDR")]
    service_cidr: CidrBlock,
    #[serde(rename = "kubernetesServiceIP")]
    kubernetes_service_ip: Ipv4Addr,
    #[serde(rename = "dnsServiceIP")]
    dns_service_ip: Ipv4Addr,
}

impl ClusterNetworkConfig {
    pub fn vpc_cidr(&self) -> CidrBlock {
        self.vpc_cidr
    }

    pub fn instance_cidr(&self) -> CidrBlock {
        self.instance_cidr
    }

    pub fn controller_ip(&self) -> Ipv4Addr {
        self.controller_ip
    }

    pub fn pod_cidr(&self) -> CidrBlock {
        self.pod_cidr
    }

    pub fn service_cidr(&self) -> CidrBlock {
        self.service_cidr
    }

    pub fn kubernetes_service_ip(&self) -> Ipv4Addr {
        self.kubernetes_service_ip
    }

    pub fn dns_service_ip(&self) -> Ipv4Addr {
        self.dns_service_ip
    }

    /// Every field written out explicitly, suitable for re-validation
    pub fn to_raw(&self) -> RawNetworkConfig {
        RawNetworkConfig {
            vpc_cidr: Some(self.vpc_cidr.to_string()),
            instance_cidr: Some(self.instance_cidr.to_string()),
            controller_ip: Some(self.controller_ip.to_string()),
            pod_cidr: Some(self.pod_cidr.to_string()),
            service_cidr: Some(self.service_cidr.to_string()),
            kubernetes_service_ip: Some(self.kubernetes_service_ip.to_string()),
            dns_service_ip: Some(self.dns_service_ip.to_string()),
        }
    }
}

/// Identifier of a single network rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Rule {
    InvalidVpcCidr,
    InvalidInstanceCidr,
    InvalidControllerIp,
    InvalidPodCidr,
    InvalidServiceCidr,
    InvalidKubernetesServiceIp,
    InvalidDnsServiceIp,
    InstanceOutsideVpc,
    ControllerOutsideInstance,
    PodOverlapsVpc,
    KubernetesServiceIpOutsideService,
    DnsServiceIpOutsideService,
    DnsServiceIpConflict,
}

impl Rule {
    pub fn code(&self) -> &'static str {
        match self {
            Rule::InvalidVpcCidr => "INVALID_VPC_CIDR",
            Rule::InvalidInstanceCidr => "INVALID_INSTANCE_CIDR",
            Rule::InvalidControllerIp => "INVALID_CONTROLLER_IP",
            Rule::InvalidPodCidr => "INVALID_POD_CIDR",
            Rule::InvalidServiceCidr => "INVALID_SERVICE_CIDR",
            Rule::InvalidKubernetesServiceIp => "INVALID_KUBERNETES_SERVICE_IP",
            Rule::InvalidDnsServiceIp => "INVALID_DNS_SERVICE_IP",
            Rule::InstanceOutsideVpc => "INSTANCE_CIDR_OUTSIDE_VPC",
            Rule::ControllerOutsideInstance => "CONTROLLER_IP_OUTSIDE_INSTANCE_CIDR",
            Rule::PodOverlapsVpc => "POD_CIDR_OVERLAPS_VPC",
            Rule::KubernetesServiceIpOutsideService => "KUBERNETES_SERVICE_IP_OUTSIDE_SERVICE_CIDR",
            Rule::DnsServiceIpOutsideService => "DNS_SERVICE_IP_OUTSIDE_SERVICE_CIDR",
            Rule::DnsServiceIpConflict => "DNS_SERVICE_IP_CONFLICT",
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One violated rule together with the values that broke it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub rule: Rule,
    pub message: String,
}

/// Every rule a raw network configuration violated, in check order
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid network configuration: {}", summarize(.violations))]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

impl ValidationError {
    pub fn has(&self, rule: Rule) -> bool {
        self.violations.iter().any(|v| v.rule == rule)
    }

    pub fn rules(&self) -> Vec<Rule> {
        self.violations.iter().map(|v| v.rule).collect()
    }
}

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| format!("[{}] {}", v.rule, v.message))
        .collect::<Vec<_>>()
        .join("; ")
}

// ============================================================================
// SBIO: Pure validation logic (no I/O)
// ============================================================================

/// Validate a raw network configuration and derive the missing pieces.
///
/// A field that fails to parse is reported once and every check that needs
/// it is skipped.
pub fn validate(raw: &RawNetworkConfig) -> Result<ClusterNetworkConfig, ValidationError> {
    let mut violations = Vec::new();

    let vpc = cidr_field(
        &raw.vpc_cidr,
        DEFAULT_VPC_CIDR,
        Rule::InvalidVpcCidr,
        "vpcCIDR",
        &mut violations,
    );
    let instance = cidr_field(
        &raw.instance_cidr,
        DEFAULT_INSTANCE_CIDR,
        Rule::InvalidInstanceCidr,
        "instanceCIDR",
        &mut violations,
    );
    let controller = ip_field(
        supplied(&raw.controller_ip).unwrap_or(DEFAULT_CONTROLLER_IP),
        Rule::InvalidControllerIp,
        "controllerIP",
        &mut violations,
    );
    let pod = cidr_field(
        &raw.pod_cidr,
        DEFAULT_POD_CIDR,
        Rule::InvalidPodCidr,
        "podCIDR",
        &mut violations,
    );
    let service = cidr_field(
        &raw.service_cidr,
        DEFAULT_SERVICE_CIDR,
        Rule::InvalidServiceCidr,
        "serviceCIDR",
        &mut violations,
    );
    let explicit_kubernetes_ip = supplied(&raw.kubernetes_service_ip).map(|s| {
        ip_field(s, Rule::InvalidKubernetesServiceIp, "kubernetesServiceIP", &mut violations)
    });
    let dns = ip_field(
        supplied(&raw.dns_service_ip).unwrap_or(DEFAULT_DNS_SERVICE_IP),
        Rule::InvalidDnsServiceIp,
        "dnsServiceIP",
        &mut violations,
    );

    if let (Some(vpc), Some(instance)) = (vpc, instance) {
        if !vpc.contains(&instance) {
            violations.push(Violation {
                rule: Rule::InstanceOutsideVpc,
                message: format!(
                    "instanceCIDR ({}) is not contained by vpcCIDR ({})",
                    instance, vpc
                ),
            });
        }
    }

    if let (Some(instance), Some(controller)) = (instance, controller) {
        if !instance.contains_addr(controller) {
            violations.push(Violation {
                rule: Rule::ControllerOutsideInstance,
                message: format!(
                    "controllerIP ({}) is not in instanceCIDR ({})",
                    controller, instance
                ),
            });
        }
    }

    if let (Some(pod), Some(vpc)) = (pod, vpc) {
        if pod.overlaps(&vpc) {
            violations.push(Violation {
                rule: Rule::PodOverlapsVpc,
                message: format!("podCIDR ({}) overlaps with vpcCIDR ({})", pod, vpc),
            });
        }
    }

    // An explicit value is always checked and never replaced by the derived one
    let kubernetes_ip = match explicit_kubernetes_ip {
        Some(parsed) => parsed,
        None => service.map(|s| s.first_host()),
    };

    if let (Some(service), Some(kubernetes_ip)) = (service, kubernetes_ip) {
        if !service.contains_addr(kubernetes_ip) {
            violations.push(Violation {
                rule: Rule::KubernetesServiceIpOutsideService,
                message: format!(
                    "kubernetesServiceIP ({}) is not in serviceCIDR ({})",
                    kubernetes_ip, service
                ),
            });
        }
    }

    if let (Some(service), Some(dns)) = (service, dns) {
        if !service.contains_addr(dns) {
            violations.push(Violation {
                rule: Rule::DnsServiceIpOutsideService,
                message: format!("dnsServiceIP ({}) is not in serviceCIDR ({})", dns, service),
            });
        }
    }

    if let (Some(dns), Some(kubernetes_ip)) = (dns, kubernetes_ip) {
        if dns == kubernetes_ip {
            violations.push(Violation {
                rule: Rule::DnsServiceIpConflict,
                message: format!(
                    "dnsServiceIP ({}) conflicts with kubernetesServiceIP ({})",
                    dns, kubernetes_ip
                ),
            });
        }
    }

    match (vpc, instance, controller, pod, service, kubernetes_ip, dns) {
        (
            Some(vpc_cidr),
            Some(instance_cidr),
            Some(controller_ip),
            Some(pod_cidr),
            Some(service_cidr),
            Some(kubernetes_service_ip),
            Some(dns_service_ip),
        ) if violations.is_empty() => Ok(ClusterNetworkConfig {
            vpc_cidr,
            instance_cidr,
            controller_ip,
            pod_cidr,
            service_cidr,
            kubernetes_service_ip,
            dns_service_ip,
        }),
        _ => Err(ValidationError { violations }),
    }
}

/// Treat blank strings the same as absent keys
fn supplied(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn cidr_field(
    value: &Option<String>,
    default: &str,
    rule: Rule,
    key: &str,
    violations: &mut Vec<Violation>,
) -> Option<CidrBlock> {
    let text = supplied(value).unwrap_or(default);
    match text.parse::<CidrBlock>() {
        Ok(block) => Some(block),
        Err(e) => {
            violations.push(Violation {
                rule,
                message: format!("{}: {}", key, e),
            });
            None
        }
    }
}

fn ip_field(
    text: &str,
    rule: Rule,
    key: &str,
    violations: &mut Vec<Violation>,
) -> Option<Ipv4Addr> {
    match parse_ip(text) {
        Ok(ip) => Some(ip),
        Err(e) => {
            violations.push(Violation {
                rule,
                message: format!("{}: {}", key, e),
            });
            None
        }
    }
}
