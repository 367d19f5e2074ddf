use crate::{store::DeploymentStore, Deployment, Object, Selector};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{fmt, sync::Arc};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub enum ResourceAction {
    Create,
    #[default]
    Update,
    Remove,
    Sync,
}

/// A notification that some set of workloads must be re-evaluated.
///
/// References are lazy: the workload IDs are computed against the live workload store when the
/// event is processed, not when it is produced.
#[derive(Clone, Default)]
pub struct ResourceEvent {
    pub deployment_references: Vec<DeploymentReference>,

    /// Messages that are forwarded as-is, without resolution.
    pub forward_messages: Vec<ForwardMessage>,

    pub detector_messages: Vec<DetectorMessage>,
}

type ResolveIds = dyn Fn(&dyn DeploymentStore) -> Vec<String> + Send + Sync;

#[derive(Clone)]
pub struct DeploymentReference {
    reference: Arc<ResolveIds>,
    pub action: ResourceAction,

    /// Resolves the referenced workloads synchronously, bypassing the dedup queue.
    pub force_detection: bool,

    /// The referenced workloads are built by another path; they are only handed to the detector.
    pub skip_resolving: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Timing {
    pub dispatcher: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ForwardMessage {
    pub action: ResourceAction,
    pub object: Object,
    pub timing: Option<Timing>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectorMessage {
    pub action: ResourceAction,
    pub object: Arc<Deployment>,
}

/// The enriched output of the resolver.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ResolvedEvent {
    pub forward_messages: Vec<ForwardMessage>,
    pub detector_messages: Vec<DetectorMessage>,
}

/// Consumes resolved events, e.g. to forward them to the control plane.
pub trait OutputQueue: Send + Sync {
    fn send(&self, event: ResolvedEvent);
}

// === impl ResourceEvent ===

impl ResourceEvent {
    pub fn is_empty(&self) -> bool {
        self.deployment_references.is_empty()
            && self.forward_messages.is_empty()
            && self.detector_messages.is_empty()
    }

    pub fn with_reference(mut self, reference: DeploymentReference) -> Self {
        self.deployment_references.push(reference);
        self
    }

    pub fn with_forward_message(mut self, msg: ForwardMessage) -> Self {
        self.forward_messages.push(msg);
        self
    }
}

impl fmt::Debug for ResourceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceEvent")
            .field("deployment_references", &self.deployment_references)
            .field("forward_messages", &self.forward_messages.len())
            .field("detector_messages", &self.detector_messages.len())
            .finish()
    }
}

// === impl DeploymentReference ===

impl DeploymentReference {
    pub fn new(
        action: ResourceAction,
        resolve: impl Fn(&dyn DeploymentStore) -> Vec<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            reference: Arc::new(resolve),
            action,
            force_detection: false,
            skip_resolving: false,
        }
    }

    /// References a fixed set of workload IDs.
    pub fn ids(action: ResourceAction, ids: impl IntoIterator<Item = String>) -> Self {
        let ids = ids.into_iter().collect::<Vec<_>>();
        Self::new(action, move |_| ids.clone())
    }

    /// References the workloads in `namespace` whose pod labels match `selector`.
    pub fn by_labels(action: ResourceAction, namespace: String, selector: Selector) -> Self {
        Self::new(action, move |store| {
            store.find_ids_by_labels(&namespace, &selector)
        })
    }

    /// References the workloads in `namespace` that run as `service_account`.
    pub fn by_service_account(
        action: ResourceAction,
        namespace: String,
        service_account: String,
    ) -> Self {
        Self::new(action, move |store| {
            store.find_ids_by_service_account(&namespace, &service_account)
        })
    }

    /// References every known workload.
    pub fn all(action: ResourceAction) -> Self {
        Self::new(action, |store| {
            store.get_all().into_iter().map(|d| d.id.clone()).collect()
        })
    }

    pub fn force_detection(mut self) -> Self {
        self.force_detection = true;
        self
    }

    pub fn skip_resolving(mut self) -> Self {
        self.skip_resolving = true;
        self
    }

    pub fn resolve(&self, store: &dyn DeploymentStore) -> Vec<String> {
        (self.reference)(store)
    }
}

impl fmt::Debug for DeploymentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeploymentReference")
            .field("action", &self.action)
            .field("force_detection", &self.force_detection)
            .field("skip_resolving", &self.skip_resolving)
            .finish_non_exhaustive()
    }
}

// === impl Timing ===

impl Timing {
    pub fn now(dispatcher: impl Into<String>) -> Self {
        Self {
            dispatcher: dispatcher.into(),
            created_at: Utc::now(),
        }
    }
}

// === impl ResolvedEvent ===

impl ResolvedEvent {
    pub fn is_empty(&self) -> bool {
        self.forward_messages.is_empty() && self.detector_messages.is_empty()
    }
}
