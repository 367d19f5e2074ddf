use ahash::AHashSet as HashSet;
use kube_sensor_core::store::EndpointManager;
use parking_lot::RwLock;
use tracing::trace;

/// Tracks the workloads whose network endpoints have been refreshed.
///
/// The sensor doesn't maintain an endpoint map of its own; workloads are recorded so that their
/// endpoints are dropped when the workload is deleted.
#[derive(Debug, Default)]
pub struct Endpoints(RwLock<HashSet<String>>);

// === impl Endpoints ===

impl Endpoints {
    pub fn remove(&self, id: &str) -> bool {
        self.0.write().remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.read().contains(id)
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }
}

impl EndpointManager for Endpoints {
    fn on_create_or_update_by_id(&self, id: &str) {
        if self.0.write().insert(id.to_string()) {
            trace!(%id, "Tracking workload endpoints");
        }
    }
}
