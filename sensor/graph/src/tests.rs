use super::*;
use crate::finder::{NetworkPolicyFinder, WorkloadFinder};
use kube_sensor_core::{
    policy::PolicyType,
    service::{ServicePort, ServiceType},
    store::{
        DeploymentStore, EndpointManager, NetworkPolicyStore, RbacStore, RegistryStore,
        ServiceStore,
    },
    BuildError, BuildState, Dependencies, Deployment, Exposure, Identifier, Kind, Labels,
    NetworkPolicy, Object, PermissionLevel, Protocol, Selector, Service, Stores, TargetPort,
};
use parking_lot::RwLock;
use std::sync::Arc;

#[test]
fn upsert_workload_without_policies() {
    let cluster = Cluster::default();
    cluster.add_workload("d1", "ns", &[("app", "web")]);
    let graph = cluster.graph();

    let snapshot = graph
        .generate_snapshot_from_upsert(Kind::Workload, "ns", "d1")
        .expect("upsert must succeed");

    assert_eq!(snapshot.top_level_nodes.len(), 1);
    let root = &snapshot.top_level_nodes[0];
    assert_eq!(root.identifier, Identifier::workload("ns", "d1"));
    assert!(root.children.is_empty());
    assert!(matches!(root.object, Some(Object::Workload(ref d)) if d.id == "d1"));
    graph.assert_consistent();
}

#[test]
fn upsert_policy_selecting_existing_workload() {
    let cluster = Cluster::default();
    cluster.add_workload("d1", "ns", &[("app", "web")]);
    let graph = cluster.graph();
    graph
        .generate_snapshot_from_upsert(Kind::Workload, "ns", "d1")
        .expect("upsert must succeed");

    cluster.add_policy("np1", "ns", &[("app", "web")]);
    let snapshot = graph
        .generate_snapshot_from_upsert(Kind::NetworkPolicy, "ns", "np1")
        .expect("upsert must succeed");

    assert_eq!(snapshot.top_level_nodes.len(), 1);
    let root = &snapshot.top_level_nodes[0];
    assert_eq!(root.identifier, Identifier::workload("ns", "d1"));
    assert_eq!(root.children.len(), 1);
    let child = &root.children[0];
    assert_eq!(child.identifier, Identifier::network_policy("ns", "np1"));
    assert!(matches!(child.object, Some(Object::NetworkPolicy(ref np)) if np.id == "np1"));
    assert!(child.children.is_empty());
    graph.assert_consistent();
}

#[test]
fn upsert_is_idempotent() {
    let cluster = Cluster::default();
    cluster.add_workload("d1", "ns", &[("app", "web")]);
    cluster.add_workload("d2", "ns", &[("app", "web"), ("tier", "frontend")]);
    cluster.add_policy("np1", "ns", &[("app", "web")]);
    cluster.add_service("svc1", "ns", Some(&[("tier", "frontend")]));
    let graph = cluster.graph();

    let first = graph
        .generate_snapshot_from_upsert(Kind::NetworkPolicy, "ns", "np1")
        .expect("upsert must succeed");
    let second = graph
        .generate_snapshot_from_upsert(Kind::NetworkPolicy, "ns", "np1")
        .expect("upsert must succeed");
    assert_eq!(first, second);
    assert_eq!(first.top_level_nodes.len(), 2);
    graph.assert_consistent();
}

#[test]
fn policy_upsert_includes_every_selected_workload() {
    let cluster = Cluster::default();
    cluster.add_workload("d1", "ns", &[("app", "web")]);
    cluster.add_workload("d2", "ns", &[("app", "web"), ("tier", "frontend")]);
    cluster.add_workload("d3", "ns", &[("app", "db")]);
    cluster.add_workload("d4", "other", &[("app", "web")]);
    let graph = cluster.graph();
    graph
        .generate_snapshot_from_upsert(Kind::Workload, "ns", "d1")
        .expect("upsert must succeed");

    cluster.add_policy("np1", "ns", &[("app", "web")]);
    let snapshot = graph
        .generate_snapshot_from_upsert(Kind::NetworkPolicy, "ns", "np1")
        .expect("upsert must succeed");

    let mut workloads = snapshot
        .nodes()
        .filter(|n| n.identifier.kind == Kind::Workload)
        .map(|n| n.identifier.id.clone())
        .collect::<Vec<_>>();
    workloads.sort();
    workloads.dedup();
    assert_eq!(workloads, vec!["d1".to_string(), "d2".to_string()]);
    graph.assert_consistent();
}

#[test]
fn empty_pod_selector_selects_the_namespace() {
    let cluster = Cluster::default();
    cluster.add_workload("d1", "ns", &[("app", "web")]);
    cluster.add_workload("d2", "ns", &[]);
    cluster.add_workload("d3", "other", &[]);
    cluster.add_policy("deny-all", "ns", &[]);
    let graph = cluster.graph();

    let snapshot = graph
        .generate_snapshot_from_upsert(Kind::NetworkPolicy, "ns", "deny-all")
        .expect("upsert must succeed");
    let roots = snapshot
        .top_level_of_kind(Kind::Workload)
        .map(|id| id.id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(roots, vec!["d1", "d2"]);
}

#[test]
fn services_select_workloads() {
    let cluster = Cluster::default();
    cluster.add_workload("d1", "ns", &[("app", "web")]);
    cluster.add_service("web", "ns", Some(&[("app", "web")]));
    cluster.add_service("headless", "ns", None);
    let graph = cluster.graph();

    let snapshot = graph
        .generate_snapshot_from_upsert(Kind::Workload, "ns", "d1")
        .expect("upsert must succeed");
    let root = &snapshot.top_level_nodes[0];
    let children = root
        .children
        .iter()
        .map(|c| c.identifier.clone())
        .collect::<Vec<_>>();
    assert_eq!(children, vec![Identifier::service("ns", "web")]);

    let snapshot = graph
        .generate_snapshot_from_upsert(Kind::Service, "ns", "headless")
        .expect("upsert must succeed");
    assert_eq!(
        snapshot.top_level_nodes[0].identifier,
        Identifier::service("ns", "headless")
    );
    graph.assert_consistent();
}

#[test]
fn reupsert_reconciles_edges() {
    let cluster = Cluster::default();
    cluster.add_workload("d1", "ns", &[("app", "web")]);
    cluster.add_workload("d2", "ns", &[("app", "web")]);
    cluster.add_policy("np1", "ns", &[("app", "web")]);
    let graph = cluster.graph();
    graph
        .generate_snapshot_from_upsert(Kind::NetworkPolicy, "ns", "np1")
        .expect("upsert must succeed");

    // The workload is relabeled so that the policy no longer selects it.
    cluster.add_workload("d1", "ns", &[("app", "api")]);
    let snapshot = graph
        .generate_snapshot_from_upsert(Kind::Workload, "ns", "d1")
        .expect("upsert must succeed");
    assert_eq!(snapshot.top_level_nodes.len(), 1);
    assert!(snapshot.top_level_nodes[0].children.is_empty());
    assert!(graph
        .dependencies_of(&Identifier::workload("ns", "d1"))
        .is_empty());

    // The policy is narrowed so that it no longer selects d2; d2 must still be re-evaluated.
    cluster.add_policy("np1", "ns", &[("app", "none")]);
    let snapshot = graph
        .generate_snapshot_from_upsert(Kind::NetworkPolicy, "ns", "np1")
        .expect("upsert must succeed");
    let roots = snapshot
        .top_level_nodes
        .iter()
        .map(|n| n.identifier.clone())
        .collect::<Vec<_>>();
    assert_eq!(
        roots,
        vec![
            Identifier::network_policy("ns", "np1"),
            Identifier::workload("ns", "d2"),
        ]
    );
    assert!(snapshot.top_level_nodes[1].children.is_empty());
    graph.assert_consistent();
}

#[test]
fn upsert_of_missing_object_is_empty() {
    let cluster = Cluster::default();
    let graph = cluster.graph();
    let snapshot = graph
        .generate_snapshot_from_upsert(Kind::Workload, "ns", "ghost")
        .expect("upsert must succeed");
    assert!(snapshot.is_empty());
    assert!(!graph.contains(&Identifier::workload("ns", "ghost")));
    assert!(graph.is_empty());
}

#[test]
fn delete_policy_reevaluates_dependants() {
    let cluster = Cluster::default();
    cluster.add_workload("d1", "ns", &[("app", "web")]);
    cluster.add_policy("np1", "ns", &[("app", "web")]);
    let graph = cluster.graph();
    graph
        .generate_snapshot_from_upsert(Kind::NetworkPolicy, "ns", "np1")
        .expect("upsert must succeed");
    assert_eq!(graph.len(), 2);

    cluster.policies.write().clear();
    let snapshot = graph
        .generate_snapshot_from_delete(Kind::NetworkPolicy, "ns", "np1")
        .expect("delete must succeed");
    assert_eq!(snapshot.top_level_nodes.len(), 1);
    let root = &snapshot.top_level_nodes[0];
    assert_eq!(root.identifier, Identifier::workload("ns", "d1"));
    assert!(root.children.is_empty());
    assert!(!graph.contains(&Identifier::network_policy("ns", "np1")));
    graph.assert_consistent();
}

#[test]
fn delete_workload_and_unknown() {
    let cluster = Cluster::default();
    cluster.add_workload("d1", "ns", &[("app", "web")]);
    cluster.add_policy("np1", "ns", &[("app", "web")]);
    let graph = cluster.graph();
    graph
        .generate_snapshot_from_upsert(Kind::Workload, "ns", "d1")
        .expect("upsert must succeed");

    let snapshot = graph
        .generate_snapshot_from_delete(Kind::Workload, "ns", "d1")
        .expect("delete must succeed");
    assert!(snapshot.is_empty());
    assert_eq!(graph.len(), 1);
    graph.assert_consistent();

    let snapshot = graph
        .generate_snapshot_from_delete(Kind::Workload, "ns", "d1")
        .expect("delete must succeed");
    assert!(snapshot.is_empty());
}

#[test]
fn store_misses_yield_absent_leaves() {
    let cluster = Cluster::default();
    cluster.add_workload("d1", "ns", &[("app", "web")]);
    cluster.add_policy("np1", "ns", &[("app", "web")]);
    let graph = cluster.graph();
    graph
        .generate_snapshot_from_upsert(Kind::NetworkPolicy, "ns", "np1")
        .expect("upsert must succeed");

    // The policy is removed from its store but its delete hasn't been processed yet.
    cluster.policies.write().clear();
    let snapshot = graph
        .generate_snapshot_from_upsert(Kind::Workload, "ns", "d1")
        .expect("upsert must succeed");
    let root = &snapshot.top_level_nodes[0];
    assert!(root.children.is_empty());
    graph.assert_consistent();

    cluster.add_policy("np1", "ns", &[("app", "web")]);
    graph
        .generate_snapshot_from_upsert(Kind::Workload, "ns", "d1")
        .expect("upsert must succeed");
    cluster.workloads.write().clear();
    let snapshot = graph
        .generate_snapshot_from_delete(Kind::NetworkPolicy, "ns", "np1")
        .expect("delete must succeed");
    assert_eq!(snapshot.top_level_nodes.len(), 1);
    assert_eq!(snapshot.top_level_nodes[0].object, None);
}

#[test]
fn unregistered_kind() {
    let cluster = Cluster::default();
    cluster.add_workload("d1", "ns", &[("app", "web")]);
    let mut registry = FinderRegistry::default();
    registry.register(WorkloadFinder::default());
    let graph = DependencyGraph::new(registry, cluster.stores());

    assert_eq!(
        graph.generate_snapshot_from_upsert(Kind::NetworkPolicy, "ns", "np1"),
        Err(Error::UnregisteredKind(Kind::NetworkPolicy))
    );
    assert_eq!(
        graph.generate_snapshot_from_delete(Kind::Service, "ns", "svc"),
        Err(Error::UnregisteredKind(Kind::Service))
    );

    // Discovering a policy without a registered finder fails rather than skipping it.
    cluster.add_policy("np1", "ns", &[("app", "web")]);
    assert_eq!(
        graph.generate_snapshot_from_upsert(Kind::Workload, "ns", "d1"),
        Err(Error::UnregisteredKind(Kind::NetworkPolicy))
    );
}

#[test]
fn builtin_registry_covers_every_kind() {
    let registry = FinderRegistry::builtin();
    for kind in Kind::ALL {
        let finder = registry.get(kind).expect("finder must be registered");
        assert_eq!(finder.kind(), kind);
    }
}

#[test]
fn finders_reject_unexpected_objects() {
    let cluster = Cluster::default();
    let stores = cluster.stores();
    let policy = Object::NetworkPolicy(Arc::new(mk_policy("np1", "ns", &[])));

    assert_eq!(
        WorkloadFinder::default().find_dependencies(&policy, &stores),
        Err(Error::UnexpectedObject {
            expected: Kind::Workload,
            found: Kind::NetworkPolicy,
        })
    );
    let workload = Object::Workload(Arc::new(mk_workload("d1", "ns", &[])));
    assert_eq!(
        NetworkPolicyFinder::default().find_dependants(&workload, &stores),
        Err(Error::UnexpectedObject {
            expected: Kind::NetworkPolicy,
            found: Kind::Workload,
        })
    );
}

#[test]
fn top_level_walk_terminates_on_cycles() {
    let cluster = Cluster::default();
    cluster.add_workload("d1", "ns", &[("app", "web")]);
    cluster.add_workload("d2", "ns", &[("app", "web")]);
    let mut registry = FinderRegistry::builtin();
    registry.register(CyclicFinder);
    let graph = DependencyGraph::new(registry, cluster.stores());

    let snapshot = graph
        .generate_snapshot_from_upsert(Kind::Workload, "ns", "d1")
        .expect("upsert must succeed");
    graph.assert_consistent();

    // Every path is cyclic, so the changed node is the only top-level node.
    assert_eq!(snapshot.top_level_nodes.len(), 1);
    let root = &snapshot.top_level_nodes[0];
    assert_eq!(root.identifier, Identifier::workload("ns", "d1"));
    assert_eq!(root.children.len(), 1);
    assert_eq!(root.children[0].identifier, Identifier::workload("ns", "d2"));
    assert!(root.children[0].children.is_empty());

    let mut reported = vec![];
    graph.for_each_top_level_node(&Identifier::workload("ns", "d2"), |id| {
        reported.push(id.clone())
    });
    assert_eq!(reported, vec![Identifier::workload("ns", "d2")]);
}

#[test]
fn top_level_walk_reports_each_root_once() {
    let cluster = Cluster::default();
    let graph = cluster.graph();
    let np = Identifier::network_policy("ns", "np");
    let a = Identifier::workload("ns", "a");
    let b = Identifier::workload("ns", "b");
    let svc = Identifier::service("ns", "svc");

    // a and b depend on np through two paths each, and svc and np depend on each other.
    graph.force_edge(&a, &np);
    graph.force_edge(&a, &svc);
    graph.force_edge(&b, &svc);
    graph.force_edge(&svc, &np);
    graph.force_edge(&np, &svc);
    graph.assert_consistent();

    let mut reported = vec![];
    graph.for_each_top_level_node(&np, |id| reported.push(id.clone()));
    reported.sort();
    assert_eq!(reported, vec![a, b]);
}

// === fixtures ===

/// Reports every other workload in the namespace as both a dependency and a dependant.
#[test]
fn concurrent_updates_keep_edges_symmetric() {
    let cluster = Cluster::default();
    let graph = Arc::new(cluster.graph());

    let threads = (0..4)
        .map(|t| {
            let cluster = Cluster(cluster.0.clone());
            let graph = graph.clone();
            std::thread::spawn(move || {
                for n in 0..200usize {
                    let workload = ["w0", "w1", "w2"][(t + n) % 3];
                    let policy = ["np0", "np1"][(t + n) % 2];
                    let step = match (t + n) % 4 {
                        0 => {
                            cluster.add_workload(workload, "ns", &[("app", "web")]);
                            graph.generate_snapshot_from_upsert(Kind::Workload, "ns", workload)
                        }
                        1 => {
                            cluster.add_policy(policy, "ns", &[("app", "web")]);
                            graph.generate_snapshot_from_upsert(Kind::NetworkPolicy, "ns", policy)
                        }
                        2 => {
                            cluster.remove_workload(workload);
                            graph.generate_snapshot_from_delete(Kind::Workload, "ns", workload)
                        }
                        _ => {
                            cluster.remove_policy(policy);
                            graph.generate_snapshot_from_delete(Kind::NetworkPolicy, "ns", policy)
                        }
                    };
                    step.expect("graph update must succeed");
                }
            })
        })
        .collect::<Vec<_>>();
    for thread in threads {
        thread.join().expect("thread must not panic");
    }

    graph.assert_consistent();
}

struct CyclicFinder;

impl DependencyFinder for CyclicFinder {
    fn kind(&self) -> Kind {
        Kind::Workload
    }

    fn fetch(&self, stores: &Stores, _namespace: &str, id: &str) -> Option<Object> {
        stores.deployments.get(id).map(Object::Workload)
    }

    fn find_dependencies(&self, object: &Object, stores: &Stores) -> Result<Vec<Identifier>> {
        Ok(stores
            .deployments
            .get_all()
            .into_iter()
            .filter(|d| d.id != object.id() && d.namespace == object.namespace())
            .map(|d| Identifier::workload(d.namespace.clone(), d.id.clone()))
            .collect())
    }

    fn find_dependants(&self, object: &Object, stores: &Stores) -> Result<Vec<Identifier>> {
        self.find_dependencies(object, stores)
    }
}

#[derive(Default)]
struct Cluster(Arc<Resources>);

#[derive(Default)]
struct Resources {
    workloads: RwLock<Vec<Arc<Deployment>>>,
    policies: RwLock<Vec<Arc<NetworkPolicy>>>,
    services: RwLock<Vec<Arc<Service>>>,
}

impl std::ops::Deref for Cluster {
    type Target = Resources;

    fn deref(&self) -> &Resources {
        &self.0
    }
}

impl Cluster {
    fn stores(&self) -> Stores {
        Stores {
            deployments: self.0.clone(),
            network_policies: self.0.clone(),
            services: self.0.clone(),
            rbac: self.0.clone(),
            endpoints: self.0.clone(),
            registries: self.0.clone(),
        }
    }

    fn graph(&self) -> DependencyGraph {
        DependencyGraph::new(FinderRegistry::builtin(), self.stores())
    }

    fn add_workload(&self, id: &str, ns: &str, labels: &[(&'static str, &'static str)]) {
        let mut workloads = self.workloads.write();
        workloads.retain(|d| d.id != id);
        workloads.push(Arc::new(mk_workload(id, ns, labels)));
    }

    fn add_policy(&self, id: &str, ns: &str, selector: &[(&'static str, &'static str)]) {
        let mut policies = self.policies.write();
        policies.retain(|np| np.id != id);
        policies.push(Arc::new(mk_policy(id, ns, selector)));
    }

    fn remove_workload(&self, id: &str) {
        self.workloads.write().retain(|d| d.id != id);
    }

    fn remove_policy(&self, id: &str) {
        self.policies.write().retain(|np| np.id != id);
    }

    fn add_service(&self, id: &str, ns: &str, selector: Option<&[(&'static str, &'static str)]>) {
        self.services.write().push(Arc::new(Service {
            id: id.to_string(),
            name: id.to_string(),
            namespace: ns.to_string(),
            selector: selector.map(|s| Selector::from_iter(s.iter().copied())),
            service_type: ServiceType::ClusterIp,
            ports: vec![ServicePort {
                name: None,
                port: 80,
                target_port: TargetPort::Number(8080),
                node_port: None,
                protocol: Protocol::Tcp,
            }],
            external_ips: vec![],
            load_balancer_ips: vec![],
            load_balancer_hostnames: vec![],
        }));
    }
}

fn mk_workload(id: &str, ns: &str, labels: &[(&'static str, &'static str)]) -> Deployment {
    Deployment {
        id: id.to_string(),
        name: id.to_string(),
        namespace: ns.to_string(),
        labels: Labels::from_iter(labels.iter().copied()),
        service_account: "default".to_string(),
        containers: vec![],
        ports: vec![],
        service_account_permission_level: PermissionLevel::None,
    }
}

fn mk_policy(id: &str, ns: &str, selector: &[(&'static str, &'static str)]) -> NetworkPolicy {
    NetworkPolicy {
        id: id.to_string(),
        name: id.to_string(),
        namespace: ns.to_string(),
        pod_selector: Selector::from_iter(selector.iter().copied()),
        policy_types: vec![PolicyType::Ingress],
    }
}

impl DeploymentStore for Resources {
    fn get_all(&self) -> Vec<Arc<Deployment>> {
        self.workloads.read().clone()
    }

    fn get(&self, id: &str) -> Option<Arc<Deployment>> {
        self.workloads.read().iter().find(|d| d.id == id).cloned()
    }

    fn find_ids_by_service_account(&self, _: &str, _: &str) -> Vec<String> {
        vec![]
    }

    fn find_ids_by_labels(&self, namespace: &str, selector: &Selector) -> Vec<String> {
        self.workloads
            .read()
            .iter()
            .filter(|d| d.namespace == namespace && selector.matches(&d.labels))
            .map(|d| d.id.clone())
            .collect()
    }

    fn build_with_dependencies(
        &self,
        id: &str,
        _: Dependencies,
    ) -> Result<Arc<Deployment>, BuildError> {
        Err(BuildError::NotFound(id.to_string()))
    }

    fn get_built(&self, _: &str) -> BuildState {
        BuildState::NotFound
    }
}

impl NetworkPolicyStore for Resources {
    fn find(&self, namespace: &str, labels: &Labels) -> Vec<Arc<NetworkPolicy>> {
        self.policies
            .read()
            .iter()
            .filter(|np| np.namespace == namespace && np.selects(labels))
            .cloned()
            .collect()
    }

    fn get(&self, id: &str) -> Option<Arc<NetworkPolicy>> {
        self.policies.read().iter().find(|np| np.id == id).cloned()
    }

    fn upsert(&self, policy: NetworkPolicy) {
        let mut policies = self.policies.write();
        policies.retain(|np| np.id != policy.id);
        policies.push(Arc::new(policy));
    }

    fn delete(&self, id: &str) {
        self.policies.write().retain(|np| np.id != id);
    }

    fn all(&self) -> Vec<Arc<NetworkPolicy>> {
        self.policies.read().clone()
    }

    fn size(&self) -> usize {
        self.policies.read().len()
    }
}

impl ServiceStore for Resources {
    fn get_exposure_infos(&self, namespace: &str, labels: &Labels) -> Vec<Exposure> {
        ServiceStore::find(self, namespace, labels)
            .iter()
            .map(|svc| svc.exposure())
            .collect()
    }

    fn find(&self, namespace: &str, labels: &Labels) -> Vec<Arc<Service>> {
        self.services
            .read()
            .iter()
            .filter(|svc| svc.namespace == namespace && svc.selects(labels))
            .cloned()
            .collect()
    }

    fn get(&self, id: &str) -> Option<Arc<Service>> {
        self.services.read().iter().find(|svc| svc.id == id).cloned()
    }
}

impl RbacStore for Resources {
    fn get_permission_level(&self, _: &str, _: &str) -> PermissionLevel {
        PermissionLevel::None
    }
}

impl EndpointManager for Resources {
    fn on_create_or_update_by_id(&self, _: &str) {}
}

impl RegistryStore for Resources {
    fn is_local(&self, _: &str) -> bool {
        false
    }
}
