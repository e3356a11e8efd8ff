//! Construction of the resource graph from a declaration.
//!
//! Building is pure. It resolves names, carves subnet blocks, derives one
//! task per service and infers discovery edges from service environments.
//! Cross-node invariants (address layout, ports, cycles, discovery
//! resolution) are left to the validator.

use std::collections::BTreeMap;
use tracing::debug;

use super::cidr::{self, BlockRequest, CidrBlock};
use super::model::{
    ClusterSpec, DiscoveryRef, EdgeKind, Graph, NamespaceSpec, NetworkSpec, Resource, ResourceId,
    ResourceKind, ResourceSpec, ServiceSpec, SubnetSpec, TaskSpec,
};
use crate::config::{ClusterConfig, NetworkConfig, ServiceConfig, TopologyConfig};
use crate::error::SchemaError;

/// Suffix appended to a service name to form its task identity.
pub const TASK_SUFFIX: &str = "-task";

/// Builds the resource graph for a declaration.
///
/// # Errors
///
/// Returns a [`SchemaError`] for malformed input: bad names or blocks,
/// duplicate identities, unknown references and out-of-range values. No
/// partial graph is returned.
pub fn build(config: &TopologyConfig) -> Result<Graph, SchemaError> {
    let mut builder = GraphBuilder::new(config);
    builder.register_all()?;
    for (i, network) in config.networks.iter().enumerate() {
        builder.add_network(i, network)?;
    }
    for (i, namespace) in config.namespaces.iter().enumerate() {
        let id = ResourceId::from(namespace.name.as_str());
        let network = builder.resolve(
            &format!("namespaces[{i}].network"),
            &namespace.network,
            ResourceKind::Network,
        )?;
        builder.graph.connect(&id, &network, EdgeKind::DependsOn);
        builder.graph.insert(Resource {
            id,
            spec: ResourceSpec::Namespace(NamespaceSpec { network }),
        });
    }
    for (i, cluster) in config.clusters.iter().enumerate() {
        builder.add_cluster(i, cluster)?;
    }
    for (i, service) in config.services.iter().enumerate() {
        builder.add_service(i, service)?;
    }
    builder.infer_discovery_edges();

    debug!(
        "Built graph with {} resources and {} edges",
        builder.graph.len(),
        builder.graph.edges().count()
    );
    Ok(builder.graph)
}

/// Returns the task identity derived from a service name.
#[must_use]
pub fn task_id(service: &str) -> ResourceId {
    ResourceId::new(format!("{service}{TASK_SUFFIX}"))
}

struct GraphBuilder<'a> {
    config: &'a TopologyConfig,
    graph: Graph,
    kinds: BTreeMap<String, ResourceKind>,
}

impl<'a> GraphBuilder<'a> {
    fn new(config: &'a TopologyConfig) -> Self {
        Self {
            config,
            graph: Graph::empty(),
            kinds: BTreeMap::new(),
        }
    }

    /// Claims every identity up front so references may point forward.
    fn register_all(&mut self) -> Result<(), SchemaError> {
        let config = self.config;
        for (i, network) in config.networks.iter().enumerate() {
            self.register(&format!("networks[{i}].name"), &network.name, ResourceKind::Network)?;
            for (j, subnet) in network.subnets.iter().enumerate() {
                self.register(
                    &format!("networks[{i}].subnets[{j}].name"),
                    &subnet.name,
                    ResourceKind::Subnet,
                )?;
            }
        }
        for (i, namespace) in config.namespaces.iter().enumerate() {
            self.register(&format!("namespaces[{i}].name"), &namespace.name, ResourceKind::Namespace)?;
        }
        for (i, cluster) in config.clusters.iter().enumerate() {
            self.register(&format!("clusters[{i}].name"), &cluster.name, ResourceKind::Cluster)?;
        }
        for (i, service) in config.services.iter().enumerate() {
            let field = format!("services[{i}].name");
            self.register(&field, &service.name, ResourceKind::Service)?;
            self.register(&field, task_id(&service.name).as_str(), ResourceKind::Task)?;
        }
        Ok(())
    }

    fn register(&mut self, field: &str, name: &str, kind: ResourceKind) -> Result<(), SchemaError> {
        check_name(field, name)?;
        if let Some(first) = self.kinds.get(name) {
            return Err(SchemaError::DuplicateIdentity {
                name: name.to_string(),
                first: *first,
                second: kind,
            });
        }
        self.kinds.insert(name.to_string(), kind);
        Ok(())
    }

    fn resolve(&self, field: &str, target: &str, expected: ResourceKind) -> Result<ResourceId, SchemaError> {
        if self.kinds.get(target) == Some(&expected) {
            Ok(ResourceId::from(target))
        } else {
            Err(SchemaError::UnknownReference {
                field: field.to_string(),
                target: target.to_string(),
                expected,
            })
        }
    }

    fn add_network(&mut self, index: usize, network: &NetworkConfig) -> Result<(), SchemaError> {
        let field = format!("networks[{index}]");
        let block = parse_cidr(&format!("{field}.cidr"), &network.cidr)?;

        let mut requests = Vec::with_capacity(network.subnets.len());
        for (j, subnet) in network.subnets.iter().enumerate() {
            let request = match (&subnet.cidr, subnet.cidr_mask) {
                (Some(explicit), _) => BlockRequest::Explicit(parse_cidr(
                    &format!("{field}.subnets[{j}].cidr"),
                    explicit,
                )?),
                (None, Some(mask)) => BlockRequest::Mask(mask),
                (None, None) => BlockRequest::Share,
            };
            requests.push(request);
        }

        let blocks = cidr::allocate(block, &requests)
            .map_err(|(j, message)| SchemaError::field(format!("{field}.subnets[{j}]"), message))?;

        let network_id = ResourceId::from(network.name.as_str());
        for (subnet, allocated) in network.subnets.iter().zip(blocks) {
            let id = ResourceId::from(subnet.name.as_str());
            debug!("Subnet {} allocated {}", id, allocated);
            self.graph.connect(&id, &network_id, EdgeKind::Contains);
            self.graph.insert(Resource {
                id,
                spec: ResourceSpec::Subnet(SubnetSpec {
                    network: network_id.clone(),
                    cidr: allocated,
                    visibility: subnet.subnet_type,
                    reserved: subnet.reserved,
                }),
            });
        }
        self.graph.insert(Resource {
            id: network_id,
            spec: ResourceSpec::Network(NetworkSpec { cidr: block }),
        });
        Ok(())
    }

    fn add_cluster(&mut self, index: usize, cluster: &ClusterConfig) -> Result<(), SchemaError> {
        let field = format!("clusters[{index}]");
        let id = ResourceId::from(cluster.name.as_str());
        let network = self.resolve(&format!("{field}.network"), &cluster.network, ResourceKind::Network)?;
        let namespace = match &cluster.default_namespace {
            Some(name) => Some(self.resolve(
                &format!("{field}.default_namespace"),
                name,
                ResourceKind::Namespace,
            )?),
            None => None,
        };

        let capacity = &cluster.capacity;
        if capacity.max == 0 {
            return Err(SchemaError::field(
                format!("{field}.capacity.max"),
                "must be at least 1",
            ));
        }
        if capacity.min > capacity.desired || capacity.desired > capacity.max {
            return Err(SchemaError::field(
                format!("{field}.capacity"),
                format!(
                    "expected min <= desired <= max, got {}/{}/{}",
                    capacity.min, capacity.desired, capacity.max
                ),
            ));
        }
        if capacity.instance_type.trim().is_empty() {
            return Err(SchemaError::field(
                format!("{field}.capacity.instance_type"),
                "cannot be empty",
            ));
        }

        self.graph.connect(&id, &network, EdgeKind::DependsOn);
        if let Some(namespace) = &namespace {
            self.graph.connect(&id, namespace, EdgeKind::DependsOn);
        }
        self.graph.insert(Resource {
            id,
            spec: ResourceSpec::Cluster(ClusterSpec {
                network,
                namespace,
                capacity: capacity.clone(),
            }),
        });
        Ok(())
    }

    fn add_service(&mut self, index: usize, service: &ServiceConfig) -> Result<(), SchemaError> {
        let field = format!("services[{index}]");
        let id = ResourceId::from(service.name.as_str());

        if service.image.trim().is_empty() {
            return Err(SchemaError::field(format!("{field}.image"), "cannot be empty"));
        }
        if service.cpu == 0 {
            return Err(SchemaError::field(format!("{field}.cpu"), "must be positive"));
        }
        if service.memory_mib == 0 {
            return Err(SchemaError::field(format!("{field}.memory_mib"), "must be positive"));
        }

        let cluster = self.resolve(&format!("{field}.cluster"), &service.cluster, ResourceKind::Cluster)?;
        self.graph.connect(&id, &cluster, EdgeKind::DependsOn);

        let mut subnets = Vec::with_capacity(service.subnets.len());
        for (j, name) in service.subnets.iter().enumerate() {
            let subnet = self.resolve(&format!("{field}.subnets[{j}]"), name, ResourceKind::Subnet)?;
            self.graph.connect(&id, &subnet, EdgeKind::DependsOn);
            subnets.push(subnet);
        }

        if let Some(discovery) = &service.discovery {
            let namespace = self.resolve(
                &format!("{field}.discovery.namespace"),
                &discovery.namespace,
                ResourceKind::Namespace,
            )?;
            check_name(&format!("{field}.discovery.name"), &discovery.name)?;
            self.graph.connect(&id, &namespace, EdgeKind::DependsOn);
        }

        let mut depends_on = Vec::with_capacity(service.depends_on.len());
        for (j, name) in service.depends_on.iter().enumerate() {
            let expected = match self.kinds.get(name.as_str()) {
                Some(ResourceKind::Cluster) => ResourceKind::Cluster,
                _ => ResourceKind::Service,
            };
            let dependency = self.resolve(&format!("{field}.depends_on[{j}]"), name, expected)?;
            self.graph.connect(&id, &dependency, EdgeKind::DependsOn);
            depends_on.push(dependency);
        }

        let task = task_id(&service.name);
        self.graph.connect(&id, &task, EdgeKind::DependsOn);
        self.graph.insert(Resource {
            id: task.clone(),
            spec: ResourceSpec::Task(TaskSpec {
                image: service.image.clone(),
                cpu: service.cpu,
                memory_mib: service.memory_mib,
                ports: service.ports.clone(),
                environment: service.env.clone(),
                log_stream_prefix: service.log_stream_prefix.clone(),
            }),
        });

        self.graph.insert(Resource {
            id,
            spec: ResourceSpec::Service(ServiceSpec {
                cluster,
                task,
                desired_count: service.desired_count,
                subnets,
                discovery: service.discovery.clone(),
                load_balancer: service.load_balancer,
                depends_on,
            }),
        });
        Ok(())
    }

    /// Adds a `discovers` edge for every namespace-qualified name found in a
    /// service environment. Unresolved names are recorded but get no edge.
    fn infer_discovery_edges(&mut self) {
        let config = self.config;
        let mut namespaces: Vec<&str> = config
            .namespaces
            .iter()
            .map(|n| n.name.as_str())
            .collect();
        // Longest namespace wins when one is a suffix of another.
        namespaces.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        for service in &config.services {
            let id = ResourceId::from(service.name.as_str());
            for (key, value) in &service.env {
                for token in qualified_names(value) {
                    let Some((namespace, label)) = split_reference(token, &namespaces) else {
                        continue;
                    };
                    let targets: Vec<ResourceId> = self
                        .graph
                        .registered_services(namespace, label)
                        .into_iter()
                        .cloned()
                        .collect();
                    if targets.contains(&id) {
                        continue;
                    }
                    debug!("Service {} resolves {} via {}", id, token, key);
                    for target in &targets {
                        self.graph.connect(&id, target, EdgeKind::Discovers);
                    }
                    self.graph.add_discovery_ref(DiscoveryRef {
                        service: id.clone(),
                        env_key: key.clone(),
                        reference: token.to_string(),
                        namespace: ResourceId::from(namespace),
                        label: label.to_string(),
                    });
                }
            }
        }
    }
}

fn check_name(field: &str, name: &str) -> Result<(), SchemaError> {
    if name.is_empty() {
        return Err(SchemaError::field(field, "name cannot be empty"));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(SchemaError::field(
            field,
            format!("name '{name}' contains '{c}'; allowed: letters, digits, '.', '_', '-'"),
        ));
    }
    Ok(())
}

fn parse_cidr(field: &str, value: &str) -> Result<CidrBlock, SchemaError> {
    value.parse().map_err(|reason| SchemaError::InvalidCidr {
        field: field.to_string(),
        value: value.to_string(),
        reason,
    })
}

/// Splits a value into host-name-like tokens.
fn qualified_names(value: &str) -> impl Iterator<Item = &str> {
    value
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '.' || c == '-'))
        .map(|token| token.trim_matches('.'))
        .filter(|token| !token.is_empty())
}

/// Matches a token against the namespaces (longest first) and returns the
/// namespace plus the label immediately before it. A token that is itself a
/// namespace name carries no label and matches nothing.
fn split_reference<'t, 'n>(token: &'t str, namespaces: &[&'n str]) -> Option<(&'n str, &'t str)> {
    let namespace = namespaces.iter().find(|namespace| {
        token
            .strip_suffix(**namespace)
            .is_some_and(|prefix| prefix.is_empty() || prefix.ends_with('.'))
    })?;
    let label = token.strip_suffix(*namespace)?.strip_suffix('.')?.rsplit('.').next()?;
    (!label.is_empty()).then_some((*namespace, label))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    const PHOTOVIEW: &str = include_str!("../../templates/topoplan.yaml");

    fn parse(yaml: &str) -> TopologyConfig {
        ConfigParser::new().parse_yaml(yaml, None).unwrap()
    }

    fn photoview() -> TopologyConfig {
        parse(PHOTOVIEW)
    }

    #[test]
    fn test_build_photoview() {
        let graph = build(&photoview()).unwrap();

        // network, 3 subnets, namespace, cluster, 2 services, 2 tasks
        assert_eq!(graph.len(), 10);
        assert_eq!(graph.kind_of("main"), Some(ResourceKind::Network));
        assert_eq!(graph.kind_of("database-task"), Some(ResourceKind::Task));

        let Some(ResourceSpec::Subnet(subnet)) = graph.get("Database").map(|r| &r.spec) else {
            panic!("Database is not a subnet");
        };
        assert_eq!(subnet.cidr.to_string(), "10.0.2.0/28");
        assert!(subnet.reserved);
    }

    #[test]
    fn test_discovery_edge_inferred() {
        let graph = build(&photoview()).unwrap();

        assert!(graph.edges().any(|e| e.from.as_str() == "photoview"
            && e.to.as_str() == "database"
            && e.kind == EdgeKind::Discovers));

        let refs = graph.discovery_refs();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].reference, "db.svc.test.local");
        assert_eq!(refs[0].label, "db");
        assert_eq!(refs[0].env_key, "MYSQL_URL");
    }

    #[test]
    fn test_structural_edges() {
        let graph = build(&photoview()).unwrap();
        let deps = graph.dependencies_of(&ResourceId::from("photos"));
        assert_eq!(deps, vec![ResourceId::from("main"), ResourceId::from("svc.test.local")]);

        let deps = graph.dependencies_of(&ResourceId::from("database"));
        assert!(deps.contains(&ResourceId::from("database-task")));
        assert!(deps.contains(&ResourceId::from("photos")));
        assert!(deps.contains(&ResourceId::from("Application")));
    }

    #[test]
    fn test_duplicate_identity_across_kinds() {
        let mut config = photoview();
        config.clusters[0].name = String::from("Database");

        let err = build(&config).unwrap_err();
        assert!(matches!(
            err,
            SchemaError::DuplicateIdentity {
                first: ResourceKind::Subnet,
                second: ResourceKind::Cluster,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_reference() {
        let mut config = photoview();
        config.services[0].cluster = String::from("missing");

        let err = build(&config).unwrap_err();
        assert!(matches!(
            err,
            SchemaError::UnknownReference {
                expected: ResourceKind::Cluster,
                ..
            }
        ));
    }

    #[test]
    fn test_reference_to_wrong_kind() {
        let mut config = photoview();
        config.services[0].subnets = vec![String::from("main")];

        assert!(matches!(
            build(&config).unwrap_err(),
            SchemaError::UnknownReference {
                expected: ResourceKind::Subnet,
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_cidr_and_mask() {
        let mut config = photoview();
        config.networks[0].cidr = String::from("10.0.0.0/40");
        assert!(matches!(build(&config).unwrap_err(), SchemaError::InvalidCidr { .. }));

        let mut config = photoview();
        config.networks[0].subnets[0].cidr_mask = Some(33);
        assert!(matches!(build(&config).unwrap_err(), SchemaError::InvalidField { .. }));
    }

    #[test]
    fn test_invalid_values() {
        let mut config = photoview();
        config.services[1].cpu = 0;
        assert!(build(&config).is_err());

        let mut config = photoview();
        config.clusters[0].capacity.desired = 3;
        assert!(build(&config).is_err());

        let mut config = photoview();
        config.services[0].name = String::from("photo view");
        assert!(build(&config).is_err());
    }

    #[test]
    fn test_self_reference_is_not_an_edge() {
        let mut config = photoview();
        config.services[1]
            .env
            .insert(String::from("SELF"), String::from("db.svc.test.local"));

        let graph = build(&config).unwrap();
        assert!(!graph.edges().any(|e| e.from == e.to));
        assert_eq!(graph.discovery_refs().len(), 1);
    }

    #[test]
    fn test_split_reference_longest_namespace() {
        let namespaces = ["svc.test.local", "local"];
        assert_eq!(
            split_reference("db.svc.test.local", &namespaces),
            Some(("svc.test.local", "db"))
        );
        assert_eq!(split_reference("svc.test.local", &namespaces), None);
        assert_eq!(split_reference("cache.local", &namespaces), Some(("local", "cache")));
        assert_eq!(split_reference("example.com", &namespaces), None);
    }

    #[test]
    fn test_bare_namespace_name_is_not_a_reference() {
        let mut config = photoview();
        config.namespaces.push(crate::config::NamespaceConfig {
            name: String::from("local"),
            network: String::from("main"),
        });
        config.services[0]
            .env
            .insert(String::from("SEARCH_DOMAIN"), String::from("svc.test.local"));

        let graph = build(&config).unwrap();
        let refs = graph.discovery_refs();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].reference, "db.svc.test.local");
    }

    #[test]
    fn test_service_may_depend_on_cluster() {
        let mut config = photoview();
        config.services[0].depends_on = vec![String::from("photos")];

        let graph = build(&config).unwrap();
        let Some(ResourceSpec::Service(service)) = graph.get("photoview").map(|r| &r.spec) else {
            panic!("photoview is not a service");
        };
        assert_eq!(service.depends_on, vec![ResourceId::from("photos")]);
        assert!(graph
            .dependencies_of(&ResourceId::from("photoview"))
            .contains(&ResourceId::from("photos")));
    }

    #[test]
    fn test_depends_on_rejects_other_kinds() {
        let mut config = photoview();
        config.services[0].depends_on = vec![String::from("Application")];

        assert!(matches!(
            build(&config).unwrap_err(),
            SchemaError::UnknownReference {
                expected: ResourceKind::Service,
                ..
            }
        ));
    }

    #[test]
    fn test_qualified_names_tokenizer() {
        let tokens: Vec<&str> =
            qualified_names("photoview:photo-secret@tcp(db.svc.test.local)/photoview").collect();
        assert_eq!(
            tokens,
            vec!["photoview", "photo-secret", "tcp", "db.svc.test.local", "photoview"]
        );
    }
}
