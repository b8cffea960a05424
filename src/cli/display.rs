//! Display formatting for CLI output
//!
//! SBIO pattern: Pure functions that format data for display

use super::commands::CommandError;
use crate::cluster::{ClusterError, ClusterInfo, StackValidation};
use crate::config::{ClusterConfig, ConfigError};
use crate::network::ValidationError;

// ============================================================================
// Table formatting helpers
// ============================================================================

/// Two-column key/value listing with aligned values
pub fn format_settings(rows: &[(&str, String)]) -> String {
    let width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    let mut output = String::new();
    for (key, value) in rows {
        output.push_str(&format!("{:width$}   {}\n", key, value, width = width));
    }
    output
}

// ============================================================================
// Network plan display
// ============================================================================

/// Format the validated configuration and derived network plan
pub fn format_network_plan(config: &ClusterConfig) -> String {
    let network = &config.network;
    let mut output = format!("Cluster: {}\n\n", config.cluster_name);
    output.push_str(&format_settings(&[
        ("vpcCIDR", network.vpc_cidr().to_string()),
        ("instanceCIDR", network.instance_cidr().to_string()),
        ("controllerIP", network.controller_ip().to_string()),
        ("podCIDR", network.pod_cidr().to_string()),
        ("serviceCIDR", network.service_cidr().to_string()),
        ("kubernetesServiceIP", network.kubernetes_service_ip().to_string()),
        ("dnsServiceIP", network.dns_service_ip().to_string()),
    ]));
    output
}

/// One line per violated rule
pub fn format_validation_error(err: &ValidationError) -> String {
    let mut output = String::from("Network configuration is invalid:\n");
    for violation in &err.violations {
        output.push_str(&format!("  - [{}] {}\n", violation.rule, violation.message));
    }
    output
}

// ============================================================================
// Cluster display
// ============================================================================

pub fn format_cluster_info(info: &ClusterInfo) -> String {
    format!("{}\n", info)
}

/// The report is printed even when validation failed
pub fn format_stack_validation(validation: &StackValidation) -> String {
    let mut output = String::from("Validation Report:\n");
    if validation.report.trim().is_empty() {
        output.push_str("  (no report)\n");
    } else {
        for line in validation.report.lines() {
            output.push_str(&format!("  {}\n", line));
        }
    }
    if validation.is_valid() {
        output.push_str("Validation OK!\n");
    }
    output
}

/// Format a command failure, expanding network violations
pub fn format_command_error(err: &CommandError) -> String {
    let violations = match err {
        CommandError::Config(ConfigError::Network(v)) => Some(v),
        CommandError::Cluster(ClusterError::Config(ConfigError::Network(v))) => Some(v),
        _ => None,
    };
    match violations {
        Some(v) => format_validation_error(v),
        None => format!("Error: {}\n", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_cluster_config;

    const CONFIG: &str = "clusterName: demo
externalDNSName: demo.example.com
keyName: ops
region: us-west-1
";

    #[test]
    fn test_format_settings_aligns_values() {
        let output = format_settings(&[("a", "1".into()), ("longer", "2".into())]);
        assert_eq!(output, "a        1\nlonger   2\n");
    }

    #[test]
    fn test_format_network_plan() {
        let config = parse_cluster_config(CONFIG).unwrap();
        let output = format_network_plan(&config);
        assert!(output.starts_with("Cluster: demo\n"));
        assert!(output.contains("kubernetesServiceIP   10.3.0.1\n"));
        assert!(output.contains("podCIDR               10.2.0.0/16\n"));
    }

    #[test]
    fn test_format_command_error_lists_violations() {
        let content = format!("{}vpcCIDR: 10.4.3.0/16\npodCIDR: 10.4.0.0/16\n", CONFIG);
        let err = CommandError::Config(parse_cluster_config(&content).unwrap_err());
        let output = format_command_error(&err);
        assert!(output.starts_with("Network configuration is invalid:\n"));
        assert!(output.contains("[POD_CIDR_OVERLAPS_VPC]"));
    }

    #[test]
    fn test_format_stack_validation_keeps_report_on_error() {
        let validation = StackValidation {
            report: "Template format error: unresolved Ref".to_string(),
            error: Some(ClusterError::TemplateInvalid("unresolved Ref".to_string())),
        };
        let output = format_stack_validation(&validation);
        assert!(output.contains("  Template format error: unresolved Ref\n"));
        assert!(!output.contains("Validation OK!"));
    }

    #[test]
    fn test_format_command_error_plain() {
        let output = format_command_error(&CommandError::NoEndpoint);
        assert!(output.starts_with("Error: No stack service endpoint"));
    }
}
