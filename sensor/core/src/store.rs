//! Read-mostly views over the cluster's resources.
//!
//! The dependency graph and the resolver only ever read from stores; stores are updated by the
//! watch layer.

use crate::{
    Dependencies, Deployment, Exposure, Labels, NetworkPolicy, PermissionLevel, Selector, Service,
};
use std::sync::Arc;

pub trait DeploymentStore: Send + Sync {
    fn get_all(&self) -> Vec<Arc<Deployment>>;

    fn get(&self, id: &str) -> Option<Arc<Deployment>>;

    /// Returns nothing if either the namespace or the service account is empty.
    fn find_ids_by_service_account(&self, namespace: &str, service_account: &str) -> Vec<String>;

    fn find_ids_by_labels(&self, namespace: &str, selector: &Selector) -> Vec<String>;

    /// Merges `deps` into the workload and caches the result.
    ///
    /// If the cached build already carries the same dependencies, the cached object is returned
    /// unchanged.
    fn build_with_dependencies(
        &self,
        id: &str,
        deps: Dependencies,
    ) -> Result<Arc<Deployment>, BuildError>;

    fn get_built(&self, id: &str) -> BuildState;
}

pub trait NetworkPolicyStore: Send + Sync {
    /// Returns the policies in `namespace` that select a pod with `labels`.
    fn find(&self, namespace: &str, labels: &Labels) -> Vec<Arc<NetworkPolicy>>;

    fn get(&self, id: &str) -> Option<Arc<NetworkPolicy>>;

    fn upsert(&self, policy: NetworkPolicy);

    fn delete(&self, id: &str);

    fn all(&self) -> Vec<Arc<NetworkPolicy>>;

    fn size(&self) -> usize;
}

pub trait ServiceStore: Send + Sync {
    /// Returns one exposure map per service in `namespace` selecting a pod with `labels`.
    fn get_exposure_infos(&self, namespace: &str, labels: &Labels) -> Vec<Exposure>;

    fn find(&self, namespace: &str, labels: &Labels) -> Vec<Arc<Service>>;

    fn get(&self, id: &str) -> Option<Arc<Service>>;
}

pub trait RbacStore: Send + Sync {
    fn get_permission_level(&self, namespace: &str, service_account: &str) -> PermissionLevel;
}

pub trait EndpointManager: Send + Sync {
    fn on_create_or_update_by_id(&self, id: &str);
}

pub trait RegistryStore: Send + Sync {
    /// Indicates whether `image` is pulled from a registry hosted in the cluster.
    fn is_local(&self, image: &str) -> bool;
}

/// All of the stores the graph and resolver read from.
#[derive(Clone)]
pub struct Stores {
    pub deployments: Arc<dyn DeploymentStore>,
    pub network_policies: Arc<dyn NetworkPolicyStore>,
    pub services: Arc<dyn ServiceStore>,
    pub rbac: Arc<dyn RbacStore>,
    pub endpoints: Arc<dyn EndpointManager>,
    pub registries: Arc<dyn RegistryStore>,
}

/// The state of a workload's enriched build.
#[derive(Clone, Debug, PartialEq)]
pub enum BuildState {
    NotFound,
    /// The workload exists but has not been built with its dependencies yet.
    InProgress,
    Built(Arc<Deployment>),
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("deployment {0} doesn't exist")]
    NotFound(String),
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}
