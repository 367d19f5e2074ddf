use crate::{
    dedup::{Dedup, DedupQueue, Pushed},
    metrics::{DropReason, ResolverMetrics},
};
use ahash::AHashSet;
use anyhow::{bail, Result};
use kube_sensor_core::{
    BuildError, BuildState, Dependencies, DetectorMessage, ForwardMessage, ImageMetadata, Object,
    OutputQueue, ResolvedEvent, ResourceAction, ResourceEvent, Stores, Timing,
};
use parking_lot::{Mutex, RwLock};
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// The number of events buffered before `send` waits.
    pub event_buffer_size: usize,

    /// The number of distinct deployments that may wait for resolution.
    pub dedup_queue_size: usize,
}

/// Resolves deployment references into enriched deployments.
///
/// A resolver is started once and stopped once; it can't be restarted.
#[derive(Clone)]
pub struct Resolver(Arc<Inner>);

struct Inner {
    stores: Stores,
    output: Arc<dyn OutputQueue>,
    queue: DedupQueue<DeploymentRef>,
    metrics: ResolverMetrics,
    tx: RwLock<Option<mpsc::Sender<ResourceEvent>>>,
    tasks: Mutex<Tasks>,
}

enum Tasks {
    Idle(mpsc::Receiver<ResourceEvent>),
    Running {
        signal: drain::Signal,
        handles: Vec<JoinHandle<()>>,
    },
    Stopped,
}

/// A deployment waiting to be resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
struct DeploymentRef {
    id: String,
    skip: bool,
    action: ResourceAction,
}

const DISPATCHER: &str = "resolver";

// === impl Config ===

impl Default for Config {
    fn default() -> Self {
        Self {
            event_buffer_size: 1000,
            dedup_queue_size: 1000,
        }
    }
}

// === impl Resolver ===

impl Resolver {
    pub fn new(
        stores: Stores,
        output: Arc<dyn OutputQueue>,
        config: Config,
        metrics: ResolverMetrics,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.event_buffer_size.max(1));
        Self(Arc::new(Inner {
            stores,
            output,
            queue: DedupQueue::new(config.dedup_queue_size),
            metrics,
            tx: RwLock::new(Some(tx)),
            tasks: Mutex::new(Tasks::Idle(rx)),
        }))
    }

    /// Admits an event, waiting while the event buffer is full.
    ///
    /// Events sent after the resolver is stopped are dropped.
    pub async fn send(&self, event: ResourceEvent) {
        let tx = self.0.tx.read().clone();
        let Some(tx) = tx else {
            debug!(?event, "Resolver is stopped; dropping event");
            self.0.metrics.dropped(DropReason::Stopped);
            return;
        };

        match tx.send(event).await {
            Ok(()) => self.0.metrics.event(),
            Err(mpsc::error::SendError(event)) => {
                debug!(?event, "Resolver is stopped; dropping event");
                self.0.metrics.dropped(DropReason::Stopped);
            }
        }
    }

    /// Spawns the expansion and resolution tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut tasks = self.0.tasks.lock();
        let rx = match std::mem::replace(&mut *tasks, Tasks::Stopped) {
            Tasks::Idle(rx) => rx,
            running => {
                *tasks = running;
                bail!("resolver was already started");
            }
        };

        let (signal, watch) = drain::channel();
        let expand = tokio::spawn(
            self.clone()
                .expand(rx, watch.clone())
                .instrument(info_span!("expand")),
        );
        let resolve = tokio::spawn(
            self.clone()
                .resolve(watch)
                .instrument(info_span!("resolve")),
        );
        *tasks = Tasks::Running {
            signal,
            handles: vec![expand, resolve],
        };
        Ok(())
    }

    /// Stops both tasks and waits for them to complete.
    ///
    /// Events sent after `stop` is called are dropped; deployments still waiting in the dedup queue
    /// are not resolved.
    pub async fn stop(&self, err: Option<anyhow::Error>) {
        match err {
            Some(error) => info!(%error, "Stopping resolver"),
            None => info!("Stopping resolver"),
        }

        self.0.tx.write().take();
        let tasks = std::mem::replace(&mut *self.0.tasks.lock(), Tasks::Stopped);
        if let Tasks::Running { signal, handles } = tasks {
            signal.drain().await;
            for handle in handles {
                if let Err(error) = handle.await {
                    warn!(%error, "Resolver task failed");
                }
            }
        }
        debug!("Resolver stopped");
    }

    /// The number of deployments waiting to be resolved.
    pub fn pending(&self) -> usize {
        self.0.queue.len()
    }

    /// Expands an event's deployment references and emits its pre-built messages.
    ///
    /// References marked `force_detection` are resolved before this returns; all others are
    /// queued for background resolution.
    pub async fn process_message(&self, event: ResourceEvent) {
        let ResourceEvent {
            deployment_references,
            forward_messages,
            detector_messages,
        } = event;

        for reference in deployment_references {
            let deployments = self.0.stores.deployments.as_ref();
            let ids = match catch_unwind(AssertUnwindSafe(|| reference.resolve(deployments))) {
                Ok(ids) => ids,
                Err(_) => {
                    error!(?reference, "Deployment reference panicked");
                    self.0.metrics.dropped(DropReason::Panicked);
                    continue;
                }
            };
            trace!(?reference, ids = ids.len(), "Expanded reference");

            // The queue only coalesces IDs that are still pending, so each ID is pushed once.
            let mut seen = AHashSet::with_capacity(ids.len());
            for id in ids {
                if !seen.insert(id.clone()) {
                    continue;
                }

                if reference.force_detection {
                    self.resolve_deployment(&id, reference.skip_resolving, reference.action);
                    continue;
                }

                let pushed = self
                    .0
                    .queue
                    .push(DeploymentRef {
                        id,
                        skip: reference.skip_resolving,
                        action: reference.action,
                    })
                    .await;
                if pushed == Pushed::Coalesced {
                    self.0.metrics.coalesced();
                }
                self.0.metrics.queue_depth(self.0.queue.len());
            }
        }

        if !forward_messages.is_empty() || !detector_messages.is_empty() {
            self.0.output.send(ResolvedEvent {
                forward_messages,
                detector_messages,
            });
        }
    }

    /// Rebuilds a single deployment and forwards it.
    ///
    /// When `skip` is set, the deployment is built by another path: it is only handed to the
    /// detector, and only once that build has completed. Failures are logged and the deployment is
    /// dropped; it is rebuilt the next time a change references it.
    pub fn resolve_deployment(&self, id: &str, skip: bool, action: ResourceAction) {
        let _span = info_span!("deployment", %id, skip, ?action).entered();
        match catch_unwind(AssertUnwindSafe(|| self.build(id, skip, action))) {
            Ok(Ok(Some(event))) => {
                self.0.metrics.resolved();
                self.0.output.send(event);
            }
            Ok(Ok(None)) => {}
            Ok(Err(error)) => {
                debug!(%error, "Dropping deployment");
                self.0.metrics.dropped(DropReason::NotFound);
            }
            Err(_) => {
                error!("Deployment resolution panicked");
                self.0.metrics.dropped(DropReason::Panicked);
            }
        }
    }

    fn build(
        &self,
        id: &str,
        skip: bool,
        action: ResourceAction,
    ) -> Result<Option<ResolvedEvent>, BuildError> {
        let stores = &self.0.stores;

        if skip {
            return match stores.deployments.get_built(id) {
                BuildState::Built(deployment) => Ok(Some(ResolvedEvent {
                    forward_messages: vec![],
                    detector_messages: vec![DetectorMessage {
                        action,
                        object: deployment,
                    }],
                })),
                BuildState::InProgress => {
                    trace!("Deployment is still being built");
                    Ok(None)
                }
                BuildState::NotFound => Err(BuildError::NotFound(id.to_string())),
            };
        }

        let deployment = stores
            .deployments
            .get(id)
            .ok_or_else(|| BuildError::NotFound(id.to_string()))?;
        stores.endpoints.on_create_or_update_by_id(id);

        let deps = Dependencies {
            permission_level: stores
                .rbac
                .get_permission_level(&deployment.namespace, &deployment.service_account),
            exposures: stores
                .services
                .get_exposure_infos(&deployment.namespace, &deployment.labels),
            image_metadata: deployment
                .images()
                .map(|image| {
                    let meta = ImageMetadata {
                        is_cluster_local: stores.registries.is_local(image),
                    };
                    (image.to_string(), meta)
                })
                .collect(),
        };
        let built = stores.deployments.build_with_dependencies(id, deps)?;
        trace!(permission_level = ?built.service_account_permission_level, "Built deployment");

        Ok(Some(ResolvedEvent {
            forward_messages: vec![ForwardMessage {
                action,
                object: Object::Workload(built.clone()),
                timing: Some(Timing::now(DISPATCHER)),
            }],
            detector_messages: vec![DetectorMessage {
                action,
                object: built,
            }],
        }))
    }

    async fn expand(self, mut rx: mpsc::Receiver<ResourceEvent>, drain: drain::Watch) {
        tokio::pin! {
            let shutdown = drain.signaled();
        }

        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => {
                        tokio::select! {
                            _ = self.process_message(event) => {}
                            _ = &mut shutdown => {
                                debug!("Shutting down");
                                return;
                            }
                        }
                    }
                    None => return,
                },

                _ = &mut shutdown => {
                    debug!("Shutting down");
                    return;
                }
            }
        }
    }

    async fn resolve(self, drain: drain::Watch) {
        tokio::pin! {
            let shutdown = drain.signaled();
        }

        loop {
            tokio::select! {
                pending = self.0.queue.pop() => {
                    self.0.metrics.queue_depth(self.0.queue.len());
                    self.resolve_deployment(&pending.id, pending.skip, pending.action);
                }

                _ = &mut shutdown => {
                    debug!("Shutting down");
                    return;
                }
            }
        }
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("queue", &self.0.queue)
            .finish_non_exhaustive()
    }
}

// === impl DeploymentRef ===

impl Dedup for DeploymentRef {
    type Key = String;

    fn dedup_key(&self) -> String {
        self.id.clone()
    }

    /// The newest action wins. The pending reference is only resolved with `skip` if every merged
    /// reference asked to skip resolution.
    fn supersede(&mut self, newer: Self) {
        self.action = newer.action;
        self.skip = self.skip && newer.skip;
    }
}
