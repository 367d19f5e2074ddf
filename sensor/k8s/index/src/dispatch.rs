use crate::{deployment, network_policy, rbac, service, Index, Outbox};
use kube_sensor_core::{
    store::NetworkPolicyStore, Deployment, DeploymentReference, DetectorMessage, ForwardMessage,
    Kind, NetworkPolicy, Object, ResourceAction, ResourceEvent, Service, Timing,
};
use kube_sensor_graph::{ClusterSnapshot, DependencyGraph};
use kube_sensor_k8s_api::{self as k8s, ResourceExt};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info_span, warn};

/// Applies watch updates to the stores and the dependency graph, publishing a [`ResourceEvent`]
/// for each change that affects workloads.
///
/// Stores are updated before the graph so that finders observe the change.
pub struct Dispatcher {
    index: Index,
    graph: Arc<DependencyGraph>,
    events: Outbox,
}

pub type SharedDispatcher = Arc<RwLock<Dispatcher>>;

const DISPATCHER: &str = "k8s";

// === impl Dispatcher ===

impl Dispatcher {
    pub fn new(
        index: Index,
        graph: Arc<DependencyGraph>,
        events: Outbox,
    ) -> Self {
        Self {
            index,
            graph,
            events,
        }
    }

    pub fn shared(self) -> SharedDispatcher {
        Arc::new(RwLock::new(self))
    }

    fn send(&self, event: ResourceEvent) {
        if event.is_empty() {
            return;
        }
        self.events.push(event);
    }

    /// References the workloads affected by a created or updated resource.
    fn upserted(
        &self,
        kind: Kind,
        namespace: &str,
        id: &str,
        action: ResourceAction,
    ) -> Option<DeploymentReference> {
        match self.graph.generate_snapshot_from_upsert(kind, namespace, id) {
            Ok(snapshot) => workloads(&snapshot, action),
            Err(error) => {
                warn!(%error, %kind, %namespace, %id, "Failed to update dependency graph");
                None
            }
        }
    }

    /// References the workloads that depended on a deleted resource.
    fn deleted(&self, kind: Kind, namespace: &str, id: &str) -> Option<DeploymentReference> {
        match self.graph.generate_snapshot_from_delete(kind, namespace, id) {
            Ok(snapshot) => workloads(&snapshot, ResourceAction::Update),
            Err(error) => {
                warn!(%error, %kind, %namespace, %id, "Failed to update dependency graph");
                None
            }
        }
    }

    fn remove_workload(&self, deployment: Arc<Deployment>) -> ResourceEvent {
        self.index.endpoints.remove(&deployment.id);
        let references = self
            .deleted(Kind::Workload, &deployment.namespace, &deployment.id)
            .into_iter()
            .collect();
        ResourceEvent {
            deployment_references: references,
            forward_messages: vec![forward(
                ResourceAction::Remove,
                Object::Workload(deployment.clone()),
            )],
            detector_messages: vec![DetectorMessage {
                action: ResourceAction::Remove,
                object: deployment,
            }],
        }
    }

    fn remove_policy(&self, policy: Arc<NetworkPolicy>) -> ResourceEvent {
        let references = self
            .deleted(Kind::NetworkPolicy, &policy.namespace, &policy.id)
            .into_iter()
            .collect();
        ResourceEvent {
            deployment_references: references,
            forward_messages: vec![forward(
                ResourceAction::Remove,
                Object::NetworkPolicy(policy),
            )],
            ..Default::default()
        }
    }

    fn remove_service(&self, svc: Arc<Service>) -> ResourceEvent {
        let references = self
            .deleted(Kind::Service, &svc.namespace, &svc.id)
            .into_iter()
            .collect();
        ResourceEvent {
            deployment_references: references,
            ..Default::default()
        }
    }

    fn rbac_changed(&self, subjects: Vec<rbac::Subject>) {
        let references = subjects
            .iter()
            .map(|s| s.reference(ResourceAction::Update))
            .collect();
        self.send(ResourceEvent {
            deployment_references: references,
            ..Default::default()
        });
    }
}

fn workloads(snapshot: &ClusterSnapshot, action: ResourceAction) -> Option<DeploymentReference> {
    let ids = snapshot
        .top_level_of_kind(Kind::Workload)
        .map(|id| id.id.clone())
        .collect::<Vec<_>>();
    if ids.is_empty() {
        return None;
    }
    Some(DeploymentReference::ids(action, ids))
}

fn forward(action: ResourceAction, object: Object) -> ForwardMessage {
    ForwardMessage {
        action,
        object,
        timing: Some(Timing::now(DISPATCHER)),
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("index", &self.index)
            .field("graph", &self.graph.len())
            .finish_non_exhaustive()
    }
}

impl kubert::index::IndexNamespacedResource<k8s::Deployment> for Dispatcher {
    fn apply(&mut self, deployment: k8s::Deployment) {
        let _span = info_span!(
            "deployment",
            ns = ?deployment.namespace(),
            name = %deployment.name_any(),
        )
        .entered();
        let (ns, name) = (deployment.namespace(), deployment.name_any());
        let deployment = match deployment::convert(deployment) {
            Ok(deployment) => deployment,
            Err(error) => {
                warn!(%error, "Ignoring deployment");
                let stale = ns.and_then(|ns| self.index.deployments.remove(&ns, &name));
                if let Some(old) = stale {
                    debug!(id = %old.id, "Removing stale deployment");
                    let event = self.remove_workload(old);
                    self.send(event);
                }
                return;
            }
        };

        let (namespace, id) = (deployment.namespace.clone(), deployment.id.clone());
        let upserted = self.index.deployments.upsert(deployment);
        let mut event = match upserted.replaced {
            Some(old) => self.remove_workload(old),
            None => ResourceEvent::default(),
        };
        event
            .deployment_references
            .extend(self.upserted(Kind::Workload, &namespace, &id, upserted.action));
        self.send(event);
    }

    fn delete(&mut self, namespace: String, name: String) {
        let _span = info_span!("deployment", %namespace, %name).entered();
        match self.index.deployments.remove(&namespace, &name) {
            Some(deployment) => {
                let event = self.remove_workload(deployment);
                self.send(event);
            }
            None => debug!("Unknown deployment"),
        }
    }
}

impl kubert::index::IndexNamespacedResource<k8s::NetworkPolicy> for Dispatcher {
    fn apply(&mut self, policy: k8s::NetworkPolicy) {
        let _span = info_span!(
            "networkpolicy",
            ns = ?policy.namespace(),
            name = %policy.name_any(),
        )
        .entered();
        let (ns, name) = (policy.namespace(), policy.name_any());
        let policy = match network_policy::convert(policy) {
            Ok(policy) => policy,
            Err(error) => {
                warn!(%error, "Ignoring network policy");
                let stale =
                    ns.and_then(|ns| self.index.network_policies.remove_by_name(&ns, &name));
                if let Some(old) = stale {
                    debug!(id = %old.id, "Removing stale network policy");
                    let event = self.remove_policy(old);
                    self.send(event);
                }
                return;
            }
        };

        let (namespace, id) = (policy.namespace.clone(), policy.id.clone());
        let action = match self.index.network_policies.get(&id) {
            Some(_) => ResourceAction::Update,
            None => ResourceAction::Create,
        };

        let mut event = match self.index.network_policies.replace(policy) {
            Some(old) => self.remove_policy(old),
            None => ResourceEvent::default(),
        };
        if let Some(policy) = self.index.network_policies.get(&id) {
            event
                .forward_messages
                .push(forward(action, Object::NetworkPolicy(policy)));
        }
        event.deployment_references.extend(self.upserted(
            Kind::NetworkPolicy,
            &namespace,
            &id,
            ResourceAction::Update,
        ));
        self.send(event);
    }

    fn delete(&mut self, namespace: String, name: String) {
        let _span = info_span!("networkpolicy", %namespace, %name).entered();
        let Some(policy) = self.index.network_policies.remove_by_name(&namespace, &name) else {
            debug!("Unknown network policy");
            return;
        };
        let event = self.remove_policy(policy);
        self.send(event);
    }
}

impl kubert::index::IndexNamespacedResource<k8s::Service> for Dispatcher {
    fn apply(&mut self, svc: k8s::Service) {
        let _span = info_span!(
            "service",
            ns = ?svc.namespace(),
            name = %svc.name_any(),
        )
        .entered();
        let (ns, name) = (svc.namespace(), svc.name_any());
        let svc = match service::convert(svc) {
            Ok(svc) => svc,
            Err(error) => {
                warn!(%error, "Ignoring service");
                let stale = ns.and_then(|ns| self.index.services.remove(&ns, &name));
                if let Some(old) = stale {
                    debug!(id = %old.id, "Removing stale service");
                    let event = self.remove_service(old);
                    self.send(event);
                }
                return;
            }
        };

        let (namespace, id) = (svc.namespace.clone(), svc.id.clone());
        let mut event = match self.index.services.upsert(svc) {
            Some(old) => self.remove_service(old),
            None => ResourceEvent::default(),
        };
        event.deployment_references.extend(self.upserted(
            Kind::Service,
            &namespace,
            &id,
            ResourceAction::Update,
        ));
        self.send(event);
    }

    fn delete(&mut self, namespace: String, name: String) {
        let _span = info_span!("service", %namespace, %name).entered();
        let Some(svc) = self.index.services.remove(&namespace, &name) else {
            debug!("Unknown service");
            return;
        };
        let event = self.remove_service(svc);
        self.send(event);
    }
}

impl kubert::index::IndexNamespacedResource<k8s::Role> for Dispatcher {
    fn apply(&mut self, role: k8s::Role) {
        let namespace = role.namespace();
        let name = role.name_unchecked();
        let subjects = self
            .index
            .rbac
            .upsert_role(namespace, name, rbac::rules(role.rules));
        self.rbac_changed(subjects);
    }

    fn delete(&mut self, namespace: String, name: String) {
        let subjects = self.index.rbac.remove_role(Some(namespace), name);
        self.rbac_changed(subjects);
    }
}

impl kubert::index::IndexClusterResource<k8s::ClusterRole> for Dispatcher {
    fn apply(&mut self, role: k8s::ClusterRole) {
        let name = role.name_unchecked();
        let subjects = self
            .index
            .rbac
            .upsert_role(None, name, rbac::rules(role.rules));
        self.rbac_changed(subjects);
    }

    fn delete(&mut self, name: String) {
        let subjects = self.index.rbac.remove_role(None, name);
        self.rbac_changed(subjects);
    }
}

impl kubert::index::IndexNamespacedResource<k8s::RoleBinding> for Dispatcher {
    fn apply(&mut self, binding: k8s::RoleBinding) {
        let namespace = binding.namespace();
        let name = binding.name_unchecked();
        let converted = rbac::binding(namespace.as_deref(), binding.role_ref, binding.subjects);
        let subjects = self.index.rbac.upsert_binding(namespace, name, converted);
        self.rbac_changed(subjects);
    }

    fn delete(&mut self, namespace: String, name: String) {
        let subjects = self.index.rbac.remove_binding(Some(namespace), name);
        self.rbac_changed(subjects);
    }
}

impl kubert::index::IndexClusterResource<k8s::ClusterRoleBinding> for Dispatcher {
    fn apply(&mut self, binding: k8s::ClusterRoleBinding) {
        let name = binding.name_unchecked();
        let converted = rbac::binding(None, binding.role_ref, binding.subjects);
        let subjects = self.index.rbac.upsert_binding(None, name, converted);
        self.rbac_changed(subjects);
    }

    fn delete(&mut self, name: String) {
        let subjects = self.index.rbac.remove_binding(None, name);
        self.rbac_changed(subjects);
    }
}
