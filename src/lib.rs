//! kubestack: provision and tear down multi-node Kubernetes clusters
//!
//! - [`network`]: CIDR arithmetic and the cluster network plan
//! - [`config`]: `cluster.yaml` loading and validation
//! - [`assets`]: TLS identities and rendered boot payloads
//! - [`backend`]: stack service and object storage clients
//! - [`retry`]: bounded fixed-interval polling
//! - [`cluster`]: lifecycle orchestration (create, destroy, status, validate)
//! - [`cli`]: command surface

pub mod assets;
pub mod backend;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod network;
pub mod retry;
