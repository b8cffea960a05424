use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backend::{StackState, StackStatus};
use crate::config::ClusterConfig;

/// Stack output carrying the controller's private address
pub const OUTPUT_CONTROLLER_IP: &str = "ControllerIP";

/// Stack output carrying the API server URL
pub const OUTPUT_CONTROLLER_ENDPOINT: &str = "ControllerEndpoint";

/// Human-facing summary of a running cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfo {
    pub name: String,
    pub stack_id: Option<String>,
    pub status: StackStatus,
    pub controller_ip: String,
    pub controller_endpoint: String,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ClusterInfo {
    /// Outputs win over configured values
    pub fn from_state(config: &ClusterConfig, state: &StackState) -> Self {
        let controller_ip = state
            .output(OUTPUT_CONTROLLER_IP)
            .map(String::from)
            .unwrap_or_else(|| config.network.controller_ip().to_string());
        let controller_endpoint = state
            .output(OUTPUT_CONTROLLER_ENDPOINT)
            .map(String::from)
            .unwrap_or_else(|| format!("https://{}", config.external_dns_name));

        Self {
            name: config.cluster_name.clone(),
            stack_id: state.stack_id.clone(),
            status: state.status,
            controller_ip,
            controller_endpoint,
            updated_at: state.updated_at,
        }
    }
}

impl fmt::Display for ClusterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Cluster Name:        {}", self.name)?;
        writeln!(f, "Status:              {}", self.status)?;
        writeln!(f, "Controller IP:       {}", self.controller_ip)?;
        write!(f, "Controller Endpoint: {}", self.controller_endpoint)?;
        if let Some(ref id) = self.stack_id {
            write!(f, "\nStack ID:            {}", id)?;
        }
        Ok(())
    }
}
