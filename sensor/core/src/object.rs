use crate::{Deployment, Kind, NetworkPolicy, Service};
use serde::Serialize;
use std::sync::Arc;

/// A live resource, as read from its store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "object")]
pub enum Object {
    Workload(Arc<Deployment>),
    NetworkPolicy(Arc<NetworkPolicy>),
    Service(Arc<Service>),
}

impl Object {
    pub fn kind(&self) -> Kind {
        match self {
            Object::Workload(_) => Kind::Workload,
            Object::NetworkPolicy(_) => Kind::NetworkPolicy,
            Object::Service(_) => Kind::Service,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Object::Workload(d) => &d.id,
            Object::NetworkPolicy(np) => &np.id,
            Object::Service(svc) => &svc.id,
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            Object::Workload(d) => &d.namespace,
            Object::NetworkPolicy(np) => &np.namespace,
            Object::Service(svc) => &svc.namespace,
        }
    }
}

impl From<Arc<Deployment>> for Object {
    fn from(d: Arc<Deployment>) -> Self {
        Object::Workload(d)
    }
}

impl From<Arc<NetworkPolicy>> for Object {
    fn from(np: Arc<NetworkPolicy>) -> Self {
        Object::NetworkPolicy(np)
    }
}

impl From<Arc<Service>> for Object {
    fn from(svc: Arc<Service>) -> Self {
        Object::Service(svc)
    }
}
