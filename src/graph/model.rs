//! Typed resource graph.
//!
//! Nodes are [`Resource`]s keyed by [`ResourceId`]; edges read as "`from`
//! requires `to`". The graph is built fresh from a declaration on every run
//! and is never mutated after validation.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::cidr::CidrBlock;
use crate::config::{
    CapacityConfig, DiscoveryConfig, LoadBalancerConfig, PortMapping, SubnetVisibility,
};

/// Identity of a resource: its declared name, unique across all kinds.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Creates an identity from a name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for ResourceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resource kinds, in tie-breaking rank order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Virtual network.
    Network,
    /// Subnet of a network.
    Subnet,
    /// Service discovery namespace.
    Namespace,
    /// Container cluster.
    Cluster,
    /// Container definition of a service.
    Task,
    /// Running service.
    Service,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Subnet => "subnet",
            Self::Namespace => "namespace",
            Self::Cluster => "cluster",
            Self::Task => "task",
            Self::Service => "service",
        };
        write!(f, "{s}")
    }
}

/// Desired attributes of a resource, tagged by kind.
///
/// The JSON encoding of this enum is the canonical form fingerprinted for
/// change detection, so every map in it is ordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResourceSpec {
    /// A network.
    Network(NetworkSpec),
    /// A subnet.
    Subnet(SubnetSpec),
    /// A discovery namespace.
    Namespace(NamespaceSpec),
    /// A cluster.
    Cluster(ClusterSpec),
    /// A task definition.
    Task(TaskSpec),
    /// A service.
    Service(ServiceSpec),
}

/// Network attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    /// Address block.
    pub cidr: CidrBlock,
}

/// Subnet attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetSpec {
    /// Owning network.
    pub network: ResourceId,
    /// Allocated address block.
    pub cidr: CidrBlock,
    /// Visibility kind.
    pub visibility: SubnetVisibility,
    /// Space held, nothing placed.
    pub reserved: bool,
}

/// Namespace attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceSpec {
    /// Network the namespace resolves in.
    pub network: ResourceId,
}

/// Cluster attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSpec {
    /// Network the cluster runs in.
    pub network: ResourceId,
    /// Default discovery namespace.
    pub namespace: Option<ResourceId>,
    /// Instance capacity policy.
    pub capacity: CapacityConfig,
}

/// Task (container definition) attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Container image reference.
    pub image: String,
    /// CPU units.
    pub cpu: u32,
    /// Memory limit in MiB.
    pub memory_mib: u32,
    /// Port mappings.
    pub ports: Vec<PortMapping>,
    /// Container environment.
    pub environment: BTreeMap<String, String>,
    /// Log stream prefix.
    pub log_stream_prefix: Option<String>,
}

/// Service attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Owning cluster.
    pub cluster: ResourceId,
    /// The service's task definition.
    pub task: ResourceId,
    /// Number of running task copies.
    pub desired_count: u32,
    /// Placement subnets.
    pub subnets: Vec<ResourceId>,
    /// Discovery registration.
    pub discovery: Option<DiscoveryConfig>,
    /// Load balancer settings.
    pub load_balancer: Option<LoadBalancerConfig>,
    /// Explicitly declared service dependencies.
    pub depends_on: Vec<ResourceId>,
}

impl ResourceSpec {
    /// Returns the kind of this spec.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Network(_) => ResourceKind::Network,
            Self::Subnet(_) => ResourceKind::Subnet,
            Self::Namespace(_) => ResourceKind::Namespace,
            Self::Cluster(_) => ResourceKind::Cluster,
            Self::Task(_) => ResourceKind::Task,
            Self::Service(_) => ResourceKind::Service,
        }
    }
}

/// A node of the resource graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Identity.
    pub id: ResourceId,
    /// Desired attributes.
    pub spec: ResourceSpec,
}

impl Resource {
    /// Returns the resource kind.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.spec.kind()
    }
}

/// Edge kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Structural containment (subnet in network).
    Contains,
    /// Declared or structural dependency.
    DependsOn,
    /// Inferred from a namespace-qualified name in a service's environment.
    Discovers,
}

/// A directed edge: `from` requires `to`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// The dependent resource.
    pub from: ResourceId,
    /// The resource it requires.
    pub to: ResourceId,
    /// Why the edge exists.
    pub kind: EdgeKind,
}

/// A namespace-qualified name found in a service's environment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DiscoveryRef {
    /// The resolving service.
    pub service: ResourceId,
    /// Environment key the reference was found under.
    pub env_key: String,
    /// Full reference, e.g. `db.svc.test.local`.
    pub reference: String,
    /// Namespace part of the reference.
    pub namespace: ResourceId,
    /// Registered name being resolved, e.g. `db`.
    pub label: String,
}

/// The resource graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Graph {
    resources: BTreeMap<ResourceId, Resource>,
    edges: BTreeSet<Edge>,
    discovery_refs: Vec<DiscoveryRef>,
}

impl Graph {
    /// Creates an empty graph.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Adds a node. Returns the displaced node if the identity was taken.
    pub fn insert(&mut self, resource: Resource) -> Option<Resource> {
        self.resources.insert(resource.id.clone(), resource)
    }

    /// Adds an edge. Self-edges and duplicates are ignored.
    pub fn connect(&mut self, from: &ResourceId, to: &ResourceId, kind: EdgeKind) {
        if from == to && kind == EdgeKind::Discovers {
            return;
        }
        self.edges.insert(Edge {
            from: from.clone(),
            to: to.clone(),
            kind,
        });
    }

    /// Records a discovery reference.
    pub fn add_discovery_ref(&mut self, reference: DiscoveryRef) {
        self.discovery_refs.push(reference);
    }

    /// Looks up a node.
    #[must_use]
    pub fn get<Q>(&self, id: &Q) -> Option<&Resource>
    where
        ResourceId: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.resources.get(id)
    }

    /// Returns the kind of a node.
    #[must_use]
    pub fn kind_of<Q>(&self, id: &Q) -> Option<ResourceKind>
    where
        ResourceId: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.get(id).map(Resource::kind)
    }

    /// Iterates nodes in identity order.
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    /// Iterates edges in `(from, to, kind)` order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    /// Discovery references, in service then environment-key order.
    #[must_use]
    pub fn discovery_refs(&self) -> &[DiscoveryRef] {
        &self.discovery_refs
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Distinct direct dependencies of a node, in identity order.
    #[must_use]
    pub fn dependencies_of(&self, id: &ResourceId) -> Vec<ResourceId> {
        let deps: BTreeSet<&ResourceId> = self
            .edges
            .iter()
            .filter(|e| &e.from == id)
            .map(|e| &e.to)
            .collect();
        deps.into_iter().cloned().collect()
    }

    /// Direct dependencies of every node. Every node appears as a key.
    #[must_use]
    pub fn dependency_map(&self) -> BTreeMap<ResourceId, BTreeSet<ResourceId>> {
        let mut map: BTreeMap<ResourceId, BTreeSet<ResourceId>> = self
            .resources
            .keys()
            .map(|id| (id.clone(), BTreeSet::new()))
            .collect();
        for edge in &self.edges {
            if let Some(deps) = map.get_mut(&edge.from) {
                deps.insert(edge.to.clone());
            }
        }
        map
    }

    /// Services registered under `label` in `namespace`.
    #[must_use]
    pub fn registered_services(&self, namespace: &str, label: &str) -> Vec<&ResourceId> {
        self.resources
            .values()
            .filter_map(|r| match &r.spec {
                ResourceSpec::Service(service) => service
                    .discovery
                    .as_ref()
                    .filter(|d| d.namespace == namespace && d.name == label)
                    .map(|_| &r.id),
                _ => None,
            })
            .collect()
    }
}
