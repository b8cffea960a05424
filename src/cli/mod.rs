//! CLI module for kubestack
//!
//! Subcommands:
//! - `kubestack init` - Write a starter `cluster.yaml`
//! - `kubestack plan` - Validate the config and print the network plan
//! - `kubestack validate` - Dry-run the stack template against the backend
//! - `kubestack up` - Create the cluster and wait for it
//! - `kubestack status` - Show the running cluster
//! - `kubestack destroy` - Tear the cluster down and remove credentials

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod display;

pub use commands::*;
pub use display::*;

/// Environment variable holding the stack service URL
pub const ENDPOINT_ENV: &str = "KUBESTACK_ENDPOINT";

/// Environment variable holding the stack service bearer token
pub const API_TOKEN_ENV: &str = "KUBESTACK_API_TOKEN";

#[derive(Parser, Debug)]
#[command(name = "kubestack")]
#[command(about = "Provision and tear down Kubernetes clusters")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Directory holding cluster.yaml, credentials and kubeconfig
    #[arg(long, global = true, default_value = ".")]
    pub asset_dir: String,

    /// Stack service URL
    #[arg(long, global = true, env = ENDPOINT_ENV)]
    pub endpoint: Option<String>,

    /// Bearer token for the stack service
    #[arg(long, global = true, env = API_TOKEN_ENV, hide_env_values = true)]
    pub api_token: Option<String>,

    /// Path to a .env file loaded before anything else
    #[arg(long, global = true, value_name = "FILE")]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter cluster.yaml into the asset directory
    Init(InitArgs),

    /// Validate cluster.yaml and print the derived network plan
    Plan,

    /// Validate the rendered stack template with the backend
    Validate,

    /// Create the cluster
    Up,

    /// Show cluster status
    Status,

    /// Destroy the cluster and remove its local credentials
    Destroy,
}

/// Arguments for the init command
#[derive(Parser, Debug, Clone)]
pub struct InitArgs {
    /// Name of the cluster (and of its stack)
    #[arg(long)]
    pub cluster_name: String,

    /// DNS name routable to the controller
    #[arg(long = "external-dns-name")]
    pub external_dns_name: String,

    /// SSH key pair name for cluster nodes
    #[arg(long)]
    pub key_name: String,

    /// Region to provision in
    #[arg(long)]
    pub region: String,

    /// Availability zone to provision in
    #[arg(long)]
    pub availability_zone: Option<String>,
}
