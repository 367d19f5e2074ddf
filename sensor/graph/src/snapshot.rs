use kube_sensor_core::{Identifier, Kind, Object};

/// The subgraph affected by a single change.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClusterSnapshot {
    /// One tree per top-level node reachable from the changed resource.
    pub top_level_nodes: Vec<SnapshotNode>,
}

/// A resource and its dependencies, as observed when the snapshot was built.
#[derive(Clone, Debug, PartialEq)]
pub struct SnapshotNode {
    pub identifier: Identifier,

    /// `None` if the resource was no longer in its store.
    pub object: Option<Object>,

    pub children: Vec<SnapshotNode>,
}

// === impl ClusterSnapshot ===

impl ClusterSnapshot {
    pub fn is_empty(&self) -> bool {
        self.top_level_nodes.is_empty()
    }

    /// Iterates over every node in the snapshot, depth first.
    pub fn nodes(&self) -> impl Iterator<Item = &SnapshotNode> {
        self.top_level_nodes.iter().flat_map(SnapshotNode::walk)
    }

    /// The top-level nodes of the given kind.
    pub fn top_level_of_kind(&self, kind: Kind) -> impl Iterator<Item = &Identifier> {
        self.top_level_nodes
            .iter()
            .map(|n| &n.identifier)
            .filter(move |id| id.kind == kind)
    }
}

// === impl SnapshotNode ===

impl SnapshotNode {
    fn walk(&self) -> Vec<&SnapshotNode> {
        let mut nodes = vec![];
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            nodes.push(node);
            stack.extend(node.children.iter().rev());
        }
        nodes
    }
}
