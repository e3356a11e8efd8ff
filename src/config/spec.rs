//! Declaration types for the topology compiler.
//!
//! This module defines all the structs that map to the `topoplan.yaml` file.
//! These types describe the desired topology; they are turned into a typed
//! resource graph by [`crate::graph::build`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The root structure of a topology declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopologyConfig {
    /// Project-level configuration.
    pub project: ProjectConfig,
    /// State file configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Plan execution tuning.
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Networks with their subnet layout.
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,
    /// Service discovery namespaces.
    #[serde(default)]
    pub namespaces: Vec<NamespaceConfig>,
    /// Container clusters.
    #[serde(default)]
    pub clusters: Vec<ClusterConfig>,
    /// Containerized services.
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Unique name for the project.
    pub name: String,
    /// Environment (e.g., "dev", "staging", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// State file configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// State file path, relative to the declaration file.
    #[serde(default)]
    pub path: Option<String>,
}

/// Plan execution tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionConfig {
    /// Maximum number of operations applied concurrently.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Retry policy for retryable backend failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retry policy for retryable backend failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Total attempts per operation, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Growth factor between consecutive delays.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

/// A network and its subnet groups.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Network name.
    pub name: String,
    /// Address block of the whole network, e.g. `10.0.0.0/21`.
    pub cidr: String,
    /// Subnets carved from the network block, in allocation order.
    #[serde(default)]
    pub subnets: Vec<SubnetConfig>,
}

/// A subnet declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubnetConfig {
    /// Subnet name.
    pub name: String,
    /// Visibility of the subnet.
    #[serde(rename = "type")]
    pub subnet_type: SubnetVisibility,
    /// Prefix length of the subnet; the block is allocated automatically.
    #[serde(default)]
    pub cidr_mask: Option<u8>,
    /// Explicit address block; takes precedence over `cidr_mask`.
    #[serde(default)]
    pub cidr: Option<String>,
    /// Hold the address space without placing resources in it.
    #[serde(default)]
    pub reserved: bool,
}

/// Subnet visibility kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SubnetVisibility {
    /// Routable from the internet.
    Public,
    /// Outbound access only.
    Private,
    /// No route outside the network.
    Isolated,
}

/// A service discovery namespace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NamespaceConfig {
    /// DNS-like namespace name, e.g. `svc.test.local`.
    pub name: String,
    /// Network the namespace is attached to.
    pub network: String,
}

/// A container cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Cluster name.
    pub name: String,
    /// Network the cluster runs in (shared, never owned).
    pub network: String,
    /// Instance capacity policy.
    pub capacity: CapacityConfig,
    /// Default discovery namespace for services of this cluster.
    #[serde(default)]
    pub default_namespace: Option<String>,
}

/// Cluster instance capacity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapacityConfig {
    /// Instance size class, e.g. `t3a.medium`.
    pub instance_type: String,
    /// Minimum instance count.
    #[serde(default = "default_capacity")]
    pub min: u32,
    /// Desired instance count.
    #[serde(default = "default_capacity")]
    pub desired: u32,
    /// Maximum instance count.
    #[serde(default = "default_capacity")]
    pub max: u32,
}

/// A containerized service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Service name.
    pub name: String,
    /// Cluster the service belongs to.
    pub cluster: String,
    /// Container image reference.
    pub image: String,
    /// CPU units reserved for the container.
    #[serde(default = "default_cpu")]
    pub cpu: u32,
    /// Memory limit in MiB.
    #[serde(default = "default_memory_mib")]
    pub memory_mib: u32,
    /// Number of task copies to keep running.
    #[serde(default = "default_desired_count")]
    pub desired_count: u32,
    /// Port mappings, e.g. `"24:24/tcp"` or `"8080"`.
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    /// Container environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Discovery registration.
    #[serde(default)]
    pub discovery: Option<DiscoveryConfig>,
    /// Subnets the service's tasks are placed in.
    #[serde(default)]
    pub subnets: Vec<String>,
    /// Services that must exist before this one.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Optional load balancer in front of the service.
    #[serde(default)]
    pub load_balancer: Option<LoadBalancerConfig>,
    /// Optional log stream prefix.
    #[serde(default)]
    pub log_stream_prefix: Option<String>,
}

/// Discovery registration of a service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DiscoveryConfig {
    /// Namespace to register in.
    pub namespace: String,
    /// Name within the namespace.
    pub name: String,
}

/// Load balancer settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LoadBalancerConfig {
    /// Whether the load balancer is internet-facing.
    #[serde(default)]
    pub public: bool,
}

/// Container-to-host port mapping.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct PortMapping {
    /// Port the container listens on.
    pub container_port: u16,
    /// Port claimed on the host; `None` means dynamically assigned.
    pub host_port: Option<u16>,
    /// Transport protocol.
    pub protocol: PortProtocol,
}

/// Port protocol types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum PortProtocol {
    /// TCP protocol.
    #[default]
    Tcp,
    /// UDP protocol.
    Udp,
}

// Default value functions

const fn default_max_parallel() -> usize {
    4
}

const fn default_max_attempts() -> u32 {
    4
}

const fn default_initial_delay_ms() -> u64 {
    200
}

const fn default_max_delay_ms() -> u64 {
    5_000
}

const fn default_multiplier() -> f64 {
    2.0
}

const fn default_capacity() -> u32 {
    1
}

const fn default_cpu() -> u32 {
    256
}

const fn default_memory_mib() -> u32 {
    512
}

const fn default_desired_count() -> u32 {
    1
}

fn default_environment() -> String {
    String::from("dev")
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

// Port mapping string conversion

impl TryFrom<String> for PortMapping {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<PortMapping> for String {
    fn from(port: PortMapping) -> Self {
        port.to_string()
    }
}

impl PortMapping {
    /// Parses a mapping like `"24:24/tcp"`, `"8080:80"` or `"53/udp"`.
    ///
    /// The host part is optional; without it the host port is assigned
    /// dynamically and never conflicts.
    ///
    /// # Errors
    ///
    /// Returns an error if the mapping format is invalid.
    pub fn parse(s: &str) -> Result<Self, String> {
        let (ports, protocol) = match s.split_once('/') {
            Some((ports, proto)) => {
                let protocol = match proto.to_lowercase().as_str() {
                    "tcp" => PortProtocol::Tcp,
                    "udp" => PortProtocol::Udp,
                    other => {
                        return Err(format!("Invalid protocol: {other}. Expected: tcp or udp"));
                    }
                };
                (ports, protocol)
            }
            None => (s, PortProtocol::Tcp),
        };

        let parse_port = |p: &str| {
            p.trim()
                .parse::<u16>()
                .map_err(|_| format!("Invalid port number: {p}"))
        };

        let (host_port, container_port) = match ports.split_once(':') {
            Some((host, container)) => (Some(parse_port(host)?), parse_port(container)?),
            None => (None, parse_port(ports)?),
        };

        if container_port == 0 || host_port == Some(0) {
            return Err(format!("Port 0 is not allowed in mapping: {s}"));
        }

        Ok(Self {
            container_port,
            host_port,
            protocol,
        })
    }

    /// Creates a mapping with the host port equal to the container port.
    #[must_use]
    pub const fn fixed(port: u16) -> Self {
        Self {
            container_port: port,
            host_port: Some(port),
            protocol: PortProtocol::Tcp,
        }
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(host) = self.host_port {
            write!(f, "{host}:")?;
        }
        write!(f, "{}/{}", self.container_port, self.protocol)
    }
}

impl fmt::Display for PortProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

impl fmt::Display for SubnetVisibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Public => "public",
            Self::Private => "private",
            Self::Isolated => "isolated",
        };
        write!(f, "{s}")
    }
}

impl TopologyConfig {
    /// Returns the fully qualified project name including environment.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}-{}", self.project.name, self.project.environment)
    }

    /// Returns the total number of declared resources, derived tasks included.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        let subnets: usize = self.networks.iter().map(|n| n.subnets.len()).sum();
        self.networks.len()
            + subnets
            + self.namespaces.len()
            + self.clusters.len()
            + self.services.len() * 2
    }
}

impl DiscoveryConfig {
    /// Returns the namespace-qualified name, e.g. `db.svc.test.local`.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.name, self.namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_mapping_parse() {
        let port = PortMapping::parse("24:24/tcp").unwrap();
        assert_eq!(port.container_port, 24);
        assert_eq!(port.host_port, Some(24));
        assert_eq!(port.protocol, PortProtocol::Tcp);
    }

    #[test]
    fn test_port_mapping_dynamic_host() {
        let port = PortMapping::parse("53/udp").unwrap();
        assert_eq!(port.container_port, 53);
        assert_eq!(port.host_port, None);
        assert_eq!(port.protocol, PortProtocol::Udp);
    }

    #[test]
    fn test_port_mapping_invalid() {
        assert!(PortMapping::parse("invalid").is_err());
        assert!(PortMapping::parse("80/sctp").is_err());
        assert!(PortMapping::parse("0:80").is_err());
        assert!(PortMapping::parse("70000").is_err());
    }

    #[test]
    fn test_port_mapping_display() {
        assert_eq!(PortMapping::parse("8080:80").unwrap().to_string(), "8080:80/tcp");
        assert_eq!(PortMapping::fixed(24).to_string(), "24:24/tcp");
    }

    #[test]
    fn test_qualified_discovery_name() {
        let discovery = DiscoveryConfig {
            namespace: String::from("svc.test.local"),
            name: String::from("db"),
        };
        assert_eq!(discovery.qualified_name(), "db.svc.test.local");
    }
}
