use crate::{CanonicalId, ClusterSnapshot, FinderRegistry, Result, SnapshotNode};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use kube_sensor_core::{Identifier, Kind, Object, Stores};
use parking_lot::RwLock;
use std::collections::{BTreeSet, VecDeque};
use tracing::{debug, instrument, trace};

/// Tracks the dependencies between cluster resources and computes the snapshot affected by each
/// change.
///
/// Every snapshot operation holds the graph's write lock for its whole duration, so edges are
/// always recorded on both of their endpoints. Finders read stores while the lock is held; stores
/// must never call back into the graph.
#[derive(Debug)]
pub struct DependencyGraph {
    registry: FinderRegistry,
    stores: Stores,
    graph: RwLock<Graph>,
}

#[derive(Debug, Default)]
struct Graph {
    nodes: HashMap<CanonicalId, Node>,
}

#[derive(Debug)]
struct Node {
    identifier: Identifier,

    /// The resources this resource relies on.
    dependencies: BTreeSet<CanonicalId>,

    /// The resources relying on this resource.
    dependants: BTreeSet<CanonicalId>,
}

/// Newly tracked resources whose own edges have not been discovered yet.
type Discovery = VecDeque<(Identifier, Object)>;

// === impl DependencyGraph ===

impl DependencyGraph {
    pub fn new(registry: FinderRegistry, stores: Stores) -> Self {
        Self {
            registry,
            stores,
            graph: Default::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.graph.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.read().nodes.is_empty()
    }

    pub fn len_of_kind(&self, kind: Kind) -> usize {
        self.graph
            .read()
            .nodes
            .values()
            .filter(|n| n.identifier.kind == kind)
            .count()
    }

    pub fn contains(&self, identifier: &Identifier) -> bool {
        self.graph
            .read()
            .nodes
            .contains_key(&CanonicalId::from(identifier))
    }

    /// Records that a resource was created or updated and returns the snapshot of every
    /// top-level resource affected by the change.
    ///
    /// The first upsert of a resource discovers its neighbours, and transitively theirs, through
    /// the registered finders. Subsequent upserts re-run the resource's finder and reconcile its
    /// edges; resources that no longer depend on it are included in the snapshot so that they are
    /// re-evaluated too.
    #[instrument(level = "debug", skip(self))]
    pub fn generate_snapshot_from_upsert(
        &self,
        kind: Kind,
        namespace: &str,
        id: &str,
    ) -> Result<ClusterSnapshot> {
        let finder = self.registry.get(kind)?;
        let identifier = Identifier::new(kind, namespace, id);
        let cid = CanonicalId::from(&identifier);

        let mut graph = self.graph.write();
        let Some(object) = finder.fetch(&self.stores, namespace, id) else {
            debug!("Resource is not in its store");
            return Ok(ClusterSnapshot::default());
        };

        let dependencies = finder.find_dependencies(&object, &self.stores)?;
        let dependants = finder.find_dependants(&object, &self.stores)?;

        let mut changed = vec![cid.clone()];
        if graph.nodes.contains_key(&cid) {
            let detached = graph.detach_stale(&cid, &dependencies, &dependants);
            if !detached.is_empty() {
                debug!(detached = detached.len(), "Removed stale edges");
            }
            changed.extend(detached);
        } else {
            graph.insert(cid.clone(), identifier);
        }

        let mut discovery = Discovery::new();
        self.link(&mut graph, &mut discovery, &cid, dependencies, dependants)?;
        self.discover(&mut graph, discovery)?;

        let roots = graph.top_level_nodes(&changed);
        self.build_snapshot(&graph, &roots)
    }

    /// Records that a resource was deleted and returns the snapshot of every other top-level
    /// resource that depended on it.
    ///
    /// Top-level resources are computed before the node is removed, while its dependants are
    /// still reachable. The deleted resource never appears in the returned snapshot.
    #[instrument(level = "debug", skip(self))]
    pub fn generate_snapshot_from_delete(
        &self,
        kind: Kind,
        namespace: &str,
        id: &str,
    ) -> Result<ClusterSnapshot> {
        self.registry.get(kind)?;
        let cid = CanonicalId::from(&Identifier::new(kind, namespace, id));

        let mut graph = self.graph.write();
        if !graph.nodes.contains_key(&cid) {
            debug!("Resource is not tracked");
            return Ok(ClusterSnapshot::default());
        }

        let roots = graph
            .top_level_nodes(std::slice::from_ref(&cid))
            .into_iter()
            .filter(|root| *root != cid)
            .collect::<Vec<_>>();
        graph.remove(&cid);

        self.build_snapshot(&graph, &roots)
    }

    /// Calls `f` with each top-level resource reachable from `identifier` along dependant edges.
    ///
    /// Each top-level resource is reported once. If every path from `identifier` is cyclic,
    /// `identifier` itself is reported. `f` must not call back into the graph.
    pub fn for_each_top_level_node(&self, identifier: &Identifier, mut f: impl FnMut(&Identifier)) {
        let graph = self.graph.read();
        graph.for_each_top_level_node(&CanonicalId::from(identifier), |cid| {
            if let Some(node) = graph.nodes.get(cid) {
                f(&node.identifier);
            }
        });
    }

    /// Discovers the edges of every newly tracked resource until no new resources are found.
    fn discover(&self, graph: &mut Graph, mut discovery: Discovery) -> Result<()> {
        while let Some((identifier, object)) = discovery.pop_front() {
            let finder = self.registry.get(identifier.kind)?;
            let dependencies = finder.find_dependencies(&object, &self.stores)?;
            let dependants = finder.find_dependants(&object, &self.stores)?;
            let cid = CanonicalId::from(&identifier);
            trace!(
                %cid,
                dependencies = dependencies.len(),
                dependants = dependants.len(),
                "Discovered",
            );
            self.link(graph, &mut discovery, &cid, dependencies, dependants)?;
        }
        Ok(())
    }

    /// Adds edges between `cid` and its neighbours, tracking neighbours that aren't in the graph
    /// yet. Neighbours that are missing from their stores are skipped.
    fn link(
        &self,
        graph: &mut Graph,
        discovery: &mut Discovery,
        cid: &CanonicalId,
        dependencies: Vec<Identifier>,
        dependants: Vec<Identifier>,
    ) -> Result<()> {
        let neighbours = dependencies
            .into_iter()
            .map(|id| (id, true))
            .chain(dependants.into_iter().map(|id| (id, false)));
        for (neighbour, is_dependency) in neighbours {
            let neighbour_id = CanonicalId::from(&neighbour);
            if !graph.nodes.contains_key(&neighbour_id) {
                let finder = self.registry.get(neighbour.kind)?;
                let Some(object) = finder.fetch(&self.stores, &neighbour.namespace, &neighbour.id)
                else {
                    trace!(%neighbour_id, "Neighbour is not in its store");
                    continue;
                };
                graph.insert(neighbour_id.clone(), neighbour.clone());
                discovery.push_back((neighbour, object));
            }

            if is_dependency {
                graph.add_edge(cid, &neighbour_id);
            } else {
                graph.add_edge(&neighbour_id, cid);
            }
        }
        Ok(())
    }

    fn build_snapshot(&self, graph: &Graph, roots: &[CanonicalId]) -> Result<ClusterSnapshot> {
        let mut path = HashSet::new();
        let mut top_level_nodes = Vec::with_capacity(roots.len());
        for root in roots {
            if let Some(node) = graph.nodes.get(root) {
                top_level_nodes.push(self.build_node(graph, root, node, &mut path)?);
            }
        }
        Ok(ClusterSnapshot { top_level_nodes })
    }

    /// Builds the tree rooted at `node`, omitting any dependency already on the path from the
    /// root so that cycles can't be expanded.
    fn build_node<'g>(
        &self,
        graph: &'g Graph,
        cid: &'g CanonicalId,
        node: &'g Node,
        path: &mut HashSet<&'g CanonicalId>,
    ) -> Result<SnapshotNode> {
        let Identifier {
            kind,
            ref namespace,
            ref id,
        } = node.identifier;
        let object = self.registry.get(kind)?.fetch(&self.stores, namespace, id);

        path.insert(cid);
        let mut children = Vec::with_capacity(node.dependencies.len());
        for dependency in node.dependencies.iter() {
            if path.contains(dependency) {
                continue;
            }
            if let Some(child) = graph.nodes.get(dependency) {
                children.push(self.build_node(graph, dependency, child, path)?);
            }
        }
        path.remove(cid);

        Ok(SnapshotNode {
            identifier: node.identifier.clone(),
            object,
            children,
        })
    }
}

#[cfg(test)]
impl DependencyGraph {
    /// Panics unless every edge is recorded on both of its endpoints and points at a live node.
    pub(crate) fn assert_consistent(&self) {
        let graph = self.graph.read();
        for (cid, node) in graph.nodes.iter() {
            assert!(!node.dependencies.contains(cid), "{cid} depends on itself");
            for dependency in node.dependencies.iter() {
                let other = graph
                    .nodes
                    .get(dependency)
                    .unwrap_or_else(|| panic!("{cid} depends on missing {dependency}"));
                assert!(
                    other.dependants.contains(cid),
                    "{dependency} is missing dependant {cid}"
                );
            }
            for dependant in node.dependants.iter() {
                let other = graph
                    .nodes
                    .get(dependant)
                    .unwrap_or_else(|| panic!("{cid} has missing dependant {dependant}"));
                assert!(
                    other.dependencies.contains(cid),
                    "{dependant} is missing dependency {cid}"
                );
            }
        }
    }

    pub(crate) fn dependencies_of(&self, identifier: &Identifier) -> Vec<CanonicalId> {
        self.graph
            .read()
            .nodes
            .get(&CanonicalId::from(identifier))
            .map(|n| n.dependencies.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Adds an edge without consulting finders.
    pub(crate) fn force_edge(&self, dependant: &Identifier, dependency: &Identifier) {
        let mut graph = self.graph.write();
        let from = CanonicalId::from(dependant);
        let to = CanonicalId::from(dependency);
        graph.insert(from.clone(), dependant.clone());
        graph.insert(to.clone(), dependency.clone());
        graph.add_edge(&from, &to);
    }
}

// === impl Graph ===

impl Graph {
    fn insert(&mut self, cid: CanonicalId, identifier: Identifier) {
        self.nodes.entry(cid).or_insert_with(|| Node {
            identifier,
            dependencies: BTreeSet::new(),
            dependants: BTreeSet::new(),
        });
    }

    /// Removes a node along with every edge touching it.
    fn remove(&mut self, cid: &CanonicalId) {
        let Some(node) = self.nodes.remove(cid) else {
            return;
        };
        for dependency in node.dependencies.iter() {
            if let Some(n) = self.nodes.get_mut(dependency) {
                n.dependants.remove(cid);
            }
        }
        for dependant in node.dependants.iter() {
            if let Some(n) = self.nodes.get_mut(dependant) {
                n.dependencies.remove(cid);
            }
        }
    }

    /// Records that `dependant` relies on `dependency`. Self-loops and edges to untracked nodes
    /// are ignored.
    fn add_edge(&mut self, dependant: &CanonicalId, dependency: &CanonicalId) {
        if dependant == dependency
            || !self.nodes.contains_key(dependant)
            || !self.nodes.contains_key(dependency)
        {
            return;
        }
        if let Some(n) = self.nodes.get_mut(dependant) {
            n.dependencies.insert(dependency.clone());
        }
        if let Some(n) = self.nodes.get_mut(dependency) {
            n.dependants.insert(dependant.clone());
        }
    }

    fn remove_edge(&mut self, dependant: &CanonicalId, dependency: &CanonicalId) {
        if let Some(n) = self.nodes.get_mut(dependant) {
            n.dependencies.remove(dependency);
        }
        if let Some(n) = self.nodes.get_mut(dependency) {
            n.dependants.remove(dependant);
        }
    }

    /// Removes the edges of `cid` that its finder no longer reports and returns the dependants
    /// that were detached.
    fn detach_stale(
        &mut self,
        cid: &CanonicalId,
        dependencies: &[Identifier],
        dependants: &[Identifier],
    ) -> Vec<CanonicalId> {
        let Some(node) = self.nodes.get(cid) else {
            return vec![];
        };

        let current = dependencies
            .iter()
            .map(CanonicalId::from)
            .collect::<HashSet<_>>();
        let stale_dependencies = node
            .dependencies
            .iter()
            .filter(|d| !current.contains(*d))
            .cloned()
            .collect::<Vec<_>>();

        let current = dependants
            .iter()
            .map(CanonicalId::from)
            .collect::<HashSet<_>>();
        let stale_dependants = node
            .dependants
            .iter()
            .filter(|d| !current.contains(*d))
            .cloned()
            .collect::<Vec<_>>();

        for dependency in stale_dependencies.iter() {
            self.remove_edge(cid, dependency);
        }
        for dependant in stale_dependants.iter() {
            self.remove_edge(dependant, cid);
        }
        stale_dependants
    }

    fn for_each_top_level_node(&self, start: &CanonicalId, mut f: impl FnMut(&CanonicalId)) {
        if !self.nodes.contains_key(start) {
            return;
        }

        let mut visited = HashSet::new();
        let mut stack = vec![start];
        let mut found = false;
        while let Some(cid) = stack.pop() {
            if !visited.insert(cid) {
                continue;
            }
            let Some(node) = self.nodes.get(cid) else {
                continue;
            };
            if node.dependants.is_empty() {
                found = true;
                f(cid);
            } else {
                stack.extend(node.dependants.iter().rev());
            }
        }

        if !found {
            f(start);
        }
    }

    /// The distinct top-level nodes reachable from any of `changed`, in discovery order.
    fn top_level_nodes(&self, changed: &[CanonicalId]) -> Vec<CanonicalId> {
        let mut seen = HashSet::new();
        let mut roots = vec![];
        for cid in changed {
            self.for_each_top_level_node(cid, |root| {
                if seen.insert(root.clone()) {
                    roots.push(root.clone());
                }
            });
        }
        roots
    }
}
