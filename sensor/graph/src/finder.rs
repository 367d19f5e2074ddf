use crate::{Error, Result};
use ahash::AHashMap as HashMap;
use kube_sensor_core::{Identifier, Kind, Object, Stores};
use std::sync::Arc;

/// Computes the edges between a resource of a single kind and the rest of the cluster.
///
/// Finders must be deterministic for a fixed store state and must not modify stores.
pub trait DependencyFinder: Send + Sync {
    fn kind(&self) -> Kind;

    /// Reads the live object from its store.
    fn fetch(&self, stores: &Stores, namespace: &str, id: &str) -> Option<Object>;

    /// Returns the resources that `object`'s enrichment relies on.
    fn find_dependencies(&self, object: &Object, stores: &Stores) -> Result<Vec<Identifier>>;

    /// Returns the resources whose enrichment relies on `object`.
    fn find_dependants(&self, object: &Object, stores: &Stores) -> Result<Vec<Identifier>>;
}

/// Holds the finder for each kind tracked by a graph.
#[derive(Clone, Default)]
pub struct FinderRegistry {
    finders: HashMap<Kind, Arc<dyn DependencyFinder>>,
}

#[derive(Copy, Clone, Debug, Default)]
pub struct WorkloadFinder(());

#[derive(Copy, Clone, Debug, Default)]
pub struct NetworkPolicyFinder(());

#[derive(Copy, Clone, Debug, Default)]
pub struct ServiceFinder(());

// === impl FinderRegistry ===

impl FinderRegistry {
    /// Returns a registry with a finder for every [`Kind`].
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        registry.register(WorkloadFinder::default());
        registry.register(NetworkPolicyFinder::default());
        registry.register(ServiceFinder::default());
        registry
    }

    /// Registers a finder for its kind, replacing any previously registered finder.
    pub fn register(&mut self, finder: impl DependencyFinder + 'static) {
        self.finders.insert(finder.kind(), Arc::new(finder));
    }

    pub fn get(&self, kind: Kind) -> Result<&Arc<dyn DependencyFinder>> {
        self.finders
            .get(&kind)
            .ok_or(Error::UnregisteredKind(kind))
    }
}

impl std::fmt::Debug for FinderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds = self.finders.keys().collect::<Vec<_>>();
        kinds.sort();
        f.debug_struct("FinderRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

// === impl WorkloadFinder ===

impl DependencyFinder for WorkloadFinder {
    fn kind(&self) -> Kind {
        Kind::Workload
    }

    fn fetch(&self, stores: &Stores, _namespace: &str, id: &str) -> Option<Object> {
        stores.deployments.get(id).map(Object::Workload)
    }

    fn find_dependencies(&self, object: &Object, stores: &Stores) -> Result<Vec<Identifier>> {
        let Object::Workload(deployment) = object else {
            return Err(unexpected(Kind::Workload, object));
        };

        let policies = stores
            .network_policies
            .find(&deployment.namespace, &deployment.labels)
            .into_iter()
            .map(|np| Identifier::network_policy(np.namespace.clone(), np.id.clone()));
        let services = stores
            .services
            .find(&deployment.namespace, &deployment.labels)
            .into_iter()
            .map(|svc| Identifier::service(svc.namespace.clone(), svc.id.clone()));
        Ok(policies.chain(services).collect())
    }

    fn find_dependants(&self, object: &Object, _: &Stores) -> Result<Vec<Identifier>> {
        match object {
            Object::Workload(_) => Ok(vec![]),
            _ => Err(unexpected(Kind::Workload, object)),
        }
    }
}

// === impl NetworkPolicyFinder ===

impl DependencyFinder for NetworkPolicyFinder {
    fn kind(&self) -> Kind {
        Kind::NetworkPolicy
    }

    fn fetch(&self, stores: &Stores, _namespace: &str, id: &str) -> Option<Object> {
        stores.network_policies.get(id).map(Object::NetworkPolicy)
    }

    fn find_dependencies(&self, object: &Object, _: &Stores) -> Result<Vec<Identifier>> {
        match object {
            Object::NetworkPolicy(_) => Ok(vec![]),
            _ => Err(unexpected(Kind::NetworkPolicy, object)),
        }
    }

    fn find_dependants(&self, object: &Object, stores: &Stores) -> Result<Vec<Identifier>> {
        let Object::NetworkPolicy(policy) = object else {
            return Err(unexpected(Kind::NetworkPolicy, object));
        };

        Ok(stores
            .deployments
            .find_ids_by_labels(&policy.namespace, &policy.pod_selector)
            .into_iter()
            .map(|id| Identifier::workload(policy.namespace.clone(), id))
            .collect())
    }
}

// === impl ServiceFinder ===

impl DependencyFinder for ServiceFinder {
    fn kind(&self) -> Kind {
        Kind::Service
    }

    fn fetch(&self, stores: &Stores, _namespace: &str, id: &str) -> Option<Object> {
        stores.services.get(id).map(Object::Service)
    }

    fn find_dependencies(&self, object: &Object, _: &Stores) -> Result<Vec<Identifier>> {
        match object {
            Object::Service(_) => Ok(vec![]),
            _ => Err(unexpected(Kind::Service, object)),
        }
    }

    fn find_dependants(&self, object: &Object, stores: &Stores) -> Result<Vec<Identifier>> {
        let Object::Service(service) = object else {
            return Err(unexpected(Kind::Service, object));
        };

        let selector = match service.selector {
            Some(ref selector) if !selector.is_empty() => selector,
            _ => return Ok(vec![]),
        };
        Ok(stores
            .deployments
            .find_ids_by_labels(&service.namespace, selector)
            .into_iter()
            .map(|id| Identifier::workload(service.namespace.clone(), id))
            .collect())
    }
}

fn unexpected(expected: Kind, found: &Object) -> Error {
    Error::UnexpectedObject {
        expected,
        found: found.kind(),
    }
}
