//! Declaration module for the topology compiler.
//!
//! This module handles everything that happens before a graph exists:
//! - Deserializing `topoplan.yaml`
//! - Environment overrides and `.env` loading
//! - Hashing declarations and resource specs for change detection

mod hash;
mod parser;
mod spec;

pub use hash::ConfigHasher;
pub use parser::{
    ConfigParser, DEFAULT_CONFIG_FILES, ENV_MAX_PARALLEL, ENV_PROJECT_ENVIRONMENT,
    ENV_PROJECT_NAME, ENV_STATE_PATH, find_config_file,
};
pub use spec::{
    CapacityConfig, ClusterConfig, DiscoveryConfig, ExecutionConfig, LoadBalancerConfig,
    NamespaceConfig, NetworkConfig, PortMapping, PortProtocol, ProjectConfig, RetryConfig,
    ServiceConfig, StateConfig, SubnetConfig, SubnetVisibility, TopologyConfig,
};
