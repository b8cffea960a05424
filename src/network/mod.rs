//! Cluster address planning
//!
//! - [`cidr`]: IPv4 prefix arithmetic
//! - [`validate`](mod@validate): defaulting, derivation and cross-field checks

pub mod cidr;
pub mod validate;

pub use cidr::{parse_ip, CidrBlock, CidrError};
pub use validate::{
    validate, ClusterNetworkConfig, RawNetworkConfig, Rule, ValidationError, Violation,
    DEFAULT_CONTROLLER_IP, DEFAULT_DNS_SERVICE_IP, DEFAULT_INSTANCE_CIDR, DEFAULT_POD_CIDR,
    DEFAULT_SERVICE_CIDR, DEFAULT_VPC_CIDR,
};
