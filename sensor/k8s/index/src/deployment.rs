use crate::resource_id;
use ahash::AHashMap as HashMap;
use anyhow::{Context, Result};
use kube_sensor_core::{
    store::DeploymentStore,
    workload::{Container, ContainerImage, PortConfig},
    BuildError, BuildState, Dependencies, Deployment, Labels, ResourceAction, Selector,
};
use kube_sensor_k8s_api::{self as k8s, ResourceExt};
use parking_lot::RwLock;
use std::sync::Arc;

/// Holds the workloads observed in the cluster along with their most recent enriched build.
#[derive(Debug, Default)]
pub struct Deployments(RwLock<Index>);

#[derive(Debug, Default)]
struct Index {
    by_id: HashMap<String, Record>,
    by_name: HashMap<(String, String), String>,
}

#[derive(Debug)]
struct Record {
    raw: Arc<Deployment>,
    built: Option<Built>,
}

#[derive(Debug)]
struct Built {
    deps: Dependencies,
    deployment: Arc<Deployment>,
}

/// The outcome of storing a workload.
#[derive(Debug)]
pub struct Upserted {
    pub action: ResourceAction,

    /// A workload with the same name but a different ID that was evicted by this one.
    pub replaced: Option<Arc<Deployment>>,
}

pub(crate) fn convert(deployment: k8s::Deployment) -> Result<Deployment> {
    let namespace = deployment
        .namespace()
        .context("deployment must have a namespace")?;
    let name = deployment.name_unchecked();
    let id = resource_id(deployment.uid(), &namespace, &name);

    let template = deployment.spec.map(|spec| spec.template).unwrap_or_default();
    let labels = Labels::from(template.metadata.and_then(|meta| meta.labels));
    let pod = template.spec.unwrap_or_default();
    let service_account = pod
        .service_account_name
        .filter(|sa| !sa.is_empty())
        .unwrap_or_else(|| "default".to_string());

    let mut containers = Vec::with_capacity(pod.containers.len());
    let mut ports = vec![];
    for container in pod.containers {
        for port in container.ports.into_iter().flatten() {
            let container_port = u16::try_from(port.container_port)
                .with_context(|| format!("invalid container port {}", port.container_port))?;
            let protocol = port
                .protocol
                .as_deref()
                .unwrap_or("TCP")
                .parse()
                .map_err(anyhow::Error::msg)?;
            ports.push(PortConfig {
                name: port.name,
                container_port,
                protocol,
                exposure_infos: vec![],
            });
        }
        containers.push(Container {
            name: container.name,
            image: ContainerImage {
                name: container.image.unwrap_or_default(),
                is_cluster_local: false,
            },
        });
    }

    Ok(Deployment {
        id,
        name,
        namespace,
        labels,
        service_account,
        containers,
        ports,
        service_account_permission_level: Default::default(),
    })
}

// === impl Deployments ===

impl Deployments {
    /// Stores a workload, discarding its enriched build if the workload changed.
    pub fn upsert(&self, deployment: Deployment) -> Upserted {
        let mut index = self.0.write();
        let key = (deployment.namespace.clone(), deployment.name.clone());

        let replaced = match index.by_name.insert(key, deployment.id.clone()) {
            Some(old) if old != deployment.id => index.by_id.remove(&old).map(|r| r.raw),
            _ => None,
        };

        let action = match index.by_id.get_mut(&deployment.id) {
            Some(record) => {
                if *record.raw != deployment {
                    record.raw = Arc::new(deployment);
                    record.built = None;
                }
                ResourceAction::Update
            }
            None => {
                index.by_id.insert(
                    deployment.id.clone(),
                    Record {
                        raw: Arc::new(deployment),
                        built: None,
                    },
                );
                ResourceAction::Create
            }
        };

        Upserted { action, replaced }
    }

    pub fn remove(&self, namespace: &str, name: &str) -> Option<Arc<Deployment>> {
        let mut index = self.0.write();
        let id = index
            .by_name
            .remove(&(namespace.to_string(), name.to_string()))?;
        index.by_id.remove(&id).map(|r| r.raw)
    }

    pub fn len(&self) -> usize {
        self.0.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().by_id.is_empty()
    }

    fn find_ids(&self, f: impl Fn(&Deployment) -> bool) -> Vec<String> {
        let mut ids = self
            .0
            .read()
            .by_id
            .values()
            .filter(|r| f(&r.raw))
            .map(|r| r.raw.id.clone())
            .collect::<Vec<_>>();
        ids.sort();
        ids
    }
}

impl DeploymentStore for Deployments {
    fn get_all(&self) -> Vec<Arc<Deployment>> {
        let mut all = self
            .0
            .read()
            .by_id
            .values()
            .map(|r| r.raw.clone())
            .collect::<Vec<_>>();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    fn get(&self, id: &str) -> Option<Arc<Deployment>> {
        self.0.read().by_id.get(id).map(|r| r.raw.clone())
    }

    fn find_ids_by_service_account(&self, namespace: &str, service_account: &str) -> Vec<String> {
        if namespace.is_empty() || service_account.is_empty() {
            return vec![];
        }
        self.find_ids(|d| d.namespace == namespace && d.service_account == service_account)
    }

    fn find_ids_by_labels(&self, namespace: &str, selector: &Selector) -> Vec<String> {
        self.find_ids(|d| d.namespace == namespace && selector.matches(&d.labels))
    }

    fn build_with_dependencies(
        &self,
        id: &str,
        deps: Dependencies,
    ) -> Result<Arc<Deployment>, BuildError> {
        let deps = deps.normalized();
        let mut index = self.0.write();
        let record = index
            .by_id
            .get_mut(id)
            .ok_or_else(|| BuildError::NotFound(id.to_string()))?;

        if let Some(built) = record.built.as_ref().filter(|b| b.deps == deps) {
            return Ok(built.deployment.clone());
        }

        let deployment = Arc::new(record.raw.with_dependencies(&deps));
        record.built = Some(Built {
            deps,
            deployment: deployment.clone(),
        });
        Ok(deployment)
    }

    fn get_built(&self, id: &str) -> BuildState {
        match self.0.read().by_id.get(id) {
            None => BuildState::NotFound,
            Some(Record { built: None, .. }) => BuildState::InProgress,
            Some(Record {
                built: Some(built), ..
            }) => BuildState::Built(built.deployment.clone()),
        }
    }
}
