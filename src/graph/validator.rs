//! Structural validation of a built resource graph.
//!
//! Checks run by category in a fixed order. Every violation of a category
//! is collected, and the first category with any violation fails the run.

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use super::model::{Graph, ResourceId, ResourceSpec, ServiceSpec, SubnetSpec};
use crate::config::PortProtocol;
use crate::error::{ValidationError, Violation, ViolationKind};

/// Validates a resource graph.
///
/// # Errors
///
/// Returns a [`ValidationError`] holding every violation of the first
/// failing category.
pub fn validate(graph: &Graph) -> Result<(), ValidationError> {
    GraphValidator::new(graph).validate()
}

/// Validator for resource graphs.
#[derive(Debug)]
pub struct GraphValidator<'a> {
    graph: &'a Graph,
}

impl<'a> GraphValidator<'a> {
    /// Creates a validator over a graph.
    #[must_use]
    pub const fn new(graph: &'a Graph) -> Self {
        Self { graph }
    }

    /// Runs every check category in order.
    ///
    /// # Errors
    ///
    /// Returns the violations of the first failing category.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let checks: [(ViolationKind, fn(&Self) -> Vec<Violation>); 4] = [
            (ViolationKind::AddressLayout, Self::check_address_layout),
            (ViolationKind::PortConflict, Self::check_ports),
            (ViolationKind::DependencyCycle, Self::check_cycles),
            (ViolationKind::DiscoveryResolution, Self::check_discovery),
        ];

        for (kind, check) in checks {
            let violations = check(self);
            if !violations.is_empty() {
                debug!("{} check found {} violations", kind, violations.len());
                return Err(ValidationError::new(kind, violations));
            }
        }

        debug!("Graph validation passed");
        Ok(())
    }

    fn subnets(&self) -> impl Iterator<Item = (&'a ResourceId, &'a SubnetSpec)> {
        self.graph.resources().filter_map(|r| match &r.spec {
            ResourceSpec::Subnet(subnet) => Some((&r.id, subnet)),
            _ => None,
        })
    }

    fn services(&self) -> impl Iterator<Item = (&'a ResourceId, &'a ServiceSpec)> {
        self.graph.resources().filter_map(|r| match &r.spec {
            ResourceSpec::Service(service) => Some((&r.id, service)),
            _ => None,
        })
    }

    /// Subnet containment, sibling overlap and service placement.
    fn check_address_layout(&self) -> Vec<Violation> {
        let mut violations = Vec::new();
        let mut siblings: BTreeMap<&ResourceId, Vec<(&ResourceId, &SubnetSpec)>> = BTreeMap::new();

        for (id, subnet) in self.subnets() {
            if let Some(ResourceSpec::Network(network)) = self.graph.get(&subnet.network).map(|r| &r.spec) {
                if !network.cidr.contains(&subnet.cidr) {
                    violations.push(Violation {
                        nodes: vec![id.clone(), subnet.network.clone()],
                        message: format!(
                            "subnet block {} lies outside network block {}",
                            subnet.cidr, network.cidr
                        ),
                    });
                }
            }
            siblings.entry(&subnet.network).or_default().push((id, subnet));
        }

        for group in siblings.values() {
            for (i, (a_id, a)) in group.iter().enumerate() {
                for (b_id, b) in &group[i + 1..] {
                    if a.cidr.overlaps(&b.cidr) {
                        violations.push(Violation {
                            nodes: vec![(*a_id).clone(), (*b_id).clone()],
                            message: format!("subnet blocks {} and {} overlap", a.cidr, b.cidr),
                        });
                    }
                }
            }
        }

        for (id, service) in self.services() {
            let cluster_network = match self.graph.get(&service.cluster).map(|r| &r.spec) {
                Some(ResourceSpec::Cluster(cluster)) => Some(&cluster.network),
                _ => None,
            };
            for subnet_id in &service.subnets {
                let Some(ResourceSpec::Subnet(subnet)) = self.graph.get(subnet_id).map(|r| &r.spec) else {
                    continue;
                };
                if subnet.reserved {
                    violations.push(Violation {
                        nodes: vec![id.clone(), subnet_id.clone()],
                        message: String::from("service placed in a reserved subnet"),
                    });
                }
                if cluster_network.is_some_and(|network| network != &subnet.network) {
                    violations.push(Violation {
                        nodes: vec![id.clone(), subnet_id.clone()],
                        message: format!(
                            "subnet belongs to network {}, not the network of cluster {}",
                            subnet.network, service.cluster
                        ),
                    });
                }
            }
        }

        violations
    }

    /// Host-port uniqueness within each cluster. A claim is a host port plus
    /// its protocol, so `24/tcp` and `24/udp` coexist.
    fn check_ports(&self) -> Vec<Violation> {
        let mut claims: BTreeMap<(&ResourceId, u16, PortProtocol), Vec<&ResourceId>> = BTreeMap::new();

        for (id, service) in self.services() {
            let Some(ResourceSpec::Task(task)) = self.graph.get(&service.task).map(|r| &r.spec) else {
                continue;
            };
            for port in &task.ports {
                if let Some(host_port) = port.host_port {
                    claims
                        .entry((&service.cluster, host_port, port.protocol))
                        .or_default()
                        .push(id);
                }
            }
        }

        claims
            .into_iter()
            .filter(|(_, claimants)| claimants.len() > 1)
            .map(|((cluster, port, protocol), claimants)| {
                let mut nodes: Vec<ResourceId> = Vec::new();
                for claimant in &claimants {
                    if !nodes.contains(*claimant) {
                        nodes.push((*claimant).clone());
                    }
                }
                Violation {
                    message: format!(
                        "host port {port}/{protocol} claimed {} times in cluster {cluster} (host ports are unique per protocol)",
                        claimants.len()
                    ),
                    nodes,
                }
            })
            .collect()
    }

    /// Cycle detection by DFS coloring.
    fn check_cycles(&self) -> Vec<Violation> {
        let deps = self.graph.dependency_map();
        let mut search = CycleSearch {
            deps: &deps,
            color: BTreeMap::new(),
            stack: Vec::new(),
            cycles: Vec::new(),
        };
        for id in deps.keys() {
            if !search.color.contains_key(id) {
                search.visit(id);
            }
        }

        search
            .cycles
            .into_iter()
            .map(|cycle| {
                let mut path: Vec<&str> = cycle.iter().map(ResourceId::as_str).collect();
                if let Some(first) = cycle.first() {
                    path.push(first.as_str());
                }
                Violation {
                    message: format!("dependency cycle: {}", path.join(" -> ")),
                    nodes: cycle,
                }
            })
            .collect()
    }

    /// Discovery references resolve to exactly one registered service.
    fn check_discovery(&self) -> Vec<Violation> {
        let mut violations = Vec::new();

        let mut registrations: BTreeMap<(&str, &str), Vec<&ResourceId>> = BTreeMap::new();
        for (id, service) in self.services() {
            if let Some(discovery) = &service.discovery {
                registrations
                    .entry((discovery.namespace.as_str(), discovery.name.as_str()))
                    .or_default()
                    .push(id);
            }
        }
        for ((namespace, name), services) in &registrations {
            if services.len() > 1 {
                violations.push(Violation {
                    nodes: services.iter().map(|id| (*id).clone()).collect(),
                    message: format!("{name}.{namespace} is registered by more than one service"),
                });
            }
        }

        for reference in self.graph.discovery_refs() {
            let found = registrations
                .get(&(reference.namespace.as_str(), reference.label.as_str()))
                .map_or(0, Vec::len);
            if found == 0 {
                violations.push(Violation {
                    nodes: vec![reference.service.clone()],
                    message: format!(
                        "{} in {} does not resolve to any registered service",
                        reference.reference, reference.env_key
                    ),
                });
            }
        }

        violations
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    Gray,
    Black,
}

struct CycleSearch<'g> {
    deps: &'g BTreeMap<ResourceId, BTreeSet<ResourceId>>,
    color: BTreeMap<&'g ResourceId, Color>,
    stack: Vec<&'g ResourceId>,
    cycles: Vec<Vec<ResourceId>>,
}

impl<'g> CycleSearch<'g> {
    fn visit(&mut self, id: &'g ResourceId) {
        self.color.insert(id, Color::Gray);
        self.stack.push(id);

        let deps = self.deps;
        if let Some(children) = deps.get(id) {
            for dep in children {
                match self.color.get(dep) {
                    None => self.visit(dep),
                    Some(Color::Gray) => {
                        // Back edge: the cycle is the stack from `dep` up.
                        if let Some(start) = self.stack.iter().position(|s| *s == dep) {
                            self.cycles
                                .push(self.stack[start..].iter().map(|s| (*s).clone()).collect());
                        }
                    }
                    Some(Color::Black) => {}
                }
            }
        }

        self.stack.pop();
        self.color.insert(id, Color::Black);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigParser, PortMapping, TopologyConfig};
    use crate::graph::build;

    fn photoview() -> TopologyConfig {
        ConfigParser::new()
            .parse_yaml(include_str!("../../templates/topoplan.yaml"), None)
            .unwrap()
    }

    fn validate_config(config: &TopologyConfig) -> Result<(), ValidationError> {
        validate(&build(config).unwrap())
    }

    fn node_names(err: &ValidationError) -> Vec<&str> {
        err.offending_node_ids().into_iter().map(ResourceId::as_str).collect()
    }

    #[test]
    fn test_photoview_is_valid() {
        assert!(validate_config(&photoview()).is_ok());
    }

    #[test]
    fn test_service_cycle_names_both() {
        let mut config = photoview();
        config.services[0].depends_on = vec![String::from("database")];
        config.services[1].depends_on = vec![String::from("photoview")];

        let err = validate_config(&config).unwrap_err();
        assert_eq!(err.kind, ViolationKind::DependencyCycle);
        let names = node_names(&err);
        assert!(names.contains(&"photoview"));
        assert!(names.contains(&"database"));
    }

    #[test]
    fn test_discovery_cycle_detected() {
        let mut config = photoview();
        config.services[0].discovery = Some(crate::config::DiscoveryConfig {
            namespace: String::from("svc.test.local"),
            name: String::from("photos"),
        });
        config.services[1].env.insert(
            String::from("APP_URL"),
            String::from("http://photos.svc.test.local:24"),
        );

        let err = validate_config(&config).unwrap_err();
        assert_eq!(err.kind, ViolationKind::DependencyCycle);
        assert_eq!(err.violations.len(), 1);
        assert_eq!(err.violations[0].nodes.len(), 2);
    }

    #[test]
    fn test_host_port_conflict_names_both() {
        let mut config = photoview();
        config.services[1].ports = vec![PortMapping::fixed(24)];

        let err = validate_config(&config).unwrap_err();
        assert_eq!(err.kind, ViolationKind::PortConflict);
        assert_eq!(node_names(&err), vec!["database", "photoview"]);
    }

    #[test]
    fn test_same_host_port_on_other_protocol_is_allowed() {
        let mut config = photoview();
        config.services[1].ports = vec![PortMapping::parse("24:24/udp").unwrap()];
        assert!(validate_config(&config).is_ok());

        config.services[1].ports.push(PortMapping::fixed(24));
        let err = validate_config(&config).unwrap_err();
        assert_eq!(err.kind, ViolationKind::PortConflict);
        assert_eq!(err.violations.len(), 1);
        assert!(err.violations[0].message.starts_with("host port 24/tcp claimed 2 times"));
        assert!(err.violations[0].message.contains("unique per protocol"));
    }

    #[test]
    fn test_dynamic_ports_never_conflict() {
        let mut config = photoview();
        config.services[0].ports = vec![PortMapping::parse("24").unwrap()];
        config.services[1].ports = vec![PortMapping::parse("24").unwrap()];
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_port_claimed_twice_by_one_service() {
        let mut config = photoview();
        config.services[0].ports = vec![PortMapping::fixed(80), PortMapping::parse("80:8080").unwrap()];

        let err = validate_config(&config).unwrap_err();
        assert_eq!(err.kind, ViolationKind::PortConflict);
        assert_eq!(node_names(&err), vec!["photoview"]);
    }

    #[test]
    fn test_reserved_subnet_placement() {
        let mut config = photoview();
        config.services[1].subnets = vec![String::from("Database")];

        let err = validate_config(&config).unwrap_err();
        assert_eq!(err.kind, ViolationKind::AddressLayout);
        assert_eq!(node_names(&err), vec!["database", "Database"]);
    }

    #[test]
    fn test_overlap_and_containment_collected_together() {
        let mut config = photoview();
        config.networks[0].subnets[0].cidr = Some(String::from("10.0.1.0/24"));
        config.networks[0].subnets[1].cidr = Some(String::from("10.0.1.128/25"));
        config.networks[0].subnets[2].cidr = Some(String::from("10.1.0.0/28"));

        let err = validate_config(&config).unwrap_err();
        assert_eq!(err.kind, ViolationKind::AddressLayout);
        assert_eq!(err.violations.len(), 2);
    }

    #[test]
    fn test_address_layout_checked_before_ports() {
        let mut config = photoview();
        config.services[1].subnets = vec![String::from("Database")];
        config.services[1].ports = vec![PortMapping::fixed(24)];

        let err = validate_config(&config).unwrap_err();
        assert_eq!(err.kind, ViolationKind::AddressLayout);
    }

    #[test]
    fn test_unresolved_discovery_reference() {
        let mut config = photoview();
        config.services[1].discovery = None;

        let err = validate_config(&config).unwrap_err();
        assert_eq!(err.kind, ViolationKind::DiscoveryResolution);
        assert_eq!(node_names(&err), vec!["photoview"]);
    }

    #[test]
    fn test_ambiguous_registration() {
        let mut config = photoview();
        config.services[0].discovery = config.services[1].discovery.clone();
        config.services[0].env.clear();

        let err = validate_config(&config).unwrap_err();
        assert_eq!(err.kind, ViolationKind::DiscoveryResolution);
        assert_eq!(node_names(&err), vec!["database", "photoview"]);
    }
}
