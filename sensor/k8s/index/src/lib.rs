//! Sensor resource index
//!
//! Watches the cluster resources the sensor depends on and keeps them in stores that the
//! dependency graph and the resolver read from:
//!
//! - Each `Deployment` is indexed as a workload, keyed by its UID.
//! - Each `NetworkPolicy` and `Service` selects over workloads in its namespace.
//! - `Role`, `ClusterRole`, `RoleBinding`, and `ClusterRoleBinding` determine the permission level
//!   of each workload's service account.
//!
//! The [`Dispatcher`] applies watch updates to the stores and the dependency graph and turns each
//! change into a [`ResourceEvent`](kube_sensor_core::ResourceEvent) naming the workloads that
//! must be re-resolved.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod deployment;
mod dispatch;
mod endpoint;
pub mod metrics;
mod network_policy;
mod outbox;
pub mod rbac;
mod registry;
mod service;


pub use self::{
    deployment::{Deployments, Upserted},
    dispatch::{Dispatcher, SharedDispatcher},
    endpoint::Endpoints,
    metrics::IndexMetrics,
    network_policy::NetworkPolicies,
    outbox::Outbox,
    rbac::Rbac,
    registry::{registry_host, Registries},
    service::Services,
};
use kube_sensor_core::Stores;
use std::sync::Arc;

/// The stores backing the sensor.
#[derive(Clone, Debug)]
pub struct Index {
    pub deployments: Arc<Deployments>,
    pub network_policies: Arc<NetworkPolicies>,
    pub services: Arc<Services>,
    pub rbac: Arc<Rbac>,
    pub endpoints: Arc<Endpoints>,
    pub registries: Arc<Registries>,
}

// === impl Index ===

impl Index {
    pub fn new(cluster_local_registries: impl IntoIterator<Item = String>) -> Self {
        Self {
            deployments: Default::default(),
            network_policies: Default::default(),
            services: Default::default(),
            rbac: Default::default(),
            endpoints: Default::default(),
            registries: Arc::new(Registries::new(cluster_local_registries)),
        }
    }

    pub fn stores(&self) -> Stores {
        Stores {
            deployments: self.deployments.clone(),
            network_policies: self.network_policies.clone(),
            services: self.services.clone(),
            rbac: self.rbac.clone(),
            endpoints: self.endpoints.clone(),
            registries: self.registries.clone(),
        }
    }
}

/// Resources are identified by their UID, or by namespace and name if the UID isn't set.
fn resource_id(uid: Option<String>, namespace: &str, name: &str) -> String {
    uid.filter(|uid| !uid.is_empty())
        .unwrap_or_else(|| format!("{namespace}/{name}"))
}
