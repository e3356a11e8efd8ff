//! Resource graph model.
//!
//! This module turns a declaration into a typed dependency graph:
//! - Typed nodes and edges ([`Graph`], [`Resource`], [`Edge`])
//! - Subnet block carving ([`CidrBlock`])
//! - Graph construction ([`build`])
//! - Structural validation ([`validate`])

mod builder;
mod cidr;
mod model;
mod validator;

pub use builder::{TASK_SUFFIX, build, task_id};
pub use cidr::{BlockRequest, CidrBlock, allocate};
pub use model::{
    ClusterSpec, DiscoveryRef, Edge, EdgeKind, Graph, NamespaceSpec, NetworkSpec, Resource,
    ResourceId, ResourceKind, ResourceSpec, ServiceSpec, SubnetSpec, TaskSpec,
};
pub use validator::{GraphValidator, validate};
