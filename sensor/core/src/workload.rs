use crate::{
    dependencies::{Dependencies, ImageMetadata, PermissionLevel},
    service::{ExposureInfo, PortRef, Protocol, TargetPort},
    Labels,
};
use serde::Serialize;

/// A workload as forwarded to the control plane.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Deployment {
    pub id: String,
    pub name: String,
    pub namespace: String,

    /// The pod template's labels. Selectors are matched against these, not the deployment's own
    /// metadata labels.
    pub labels: Labels,

    pub service_account: String,
    pub containers: Vec<Container>,
    pub ports: Vec<PortConfig>,
    pub service_account_permission_level: PermissionLevel,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Container {
    pub name: String,
    pub image: ContainerImage,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ContainerImage {
    pub name: String,
    pub is_cluster_local: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PortConfig {
    pub name: Option<String>,
    pub container_port: u16,
    pub protocol: Protocol,
    pub exposure_infos: Vec<ExposureInfo>,
}

// === impl Deployment ===

impl Deployment {
    /// Returns a copy of this deployment with the given dependencies merged in.
    ///
    /// Enrichment fields are replaced rather than accumulated, so merging the same dependencies
    /// twice yields the same result.
    pub fn with_dependencies(&self, deps: &Dependencies) -> Self {
        let mut deployment = self.clone();
        deployment.service_account_permission_level = deps.permission_level;

        for port in deployment.ports.iter_mut() {
            port.exposure_infos = deps
                .exposures
                .iter()
                .flat_map(|exposure| exposure.iter())
                .filter(|(port_ref, _)| port.matches(port_ref))
                .flat_map(|(_, infos)| infos.iter().cloned())
                .collect();
            port.exposure_infos.sort();
        }

        for container in deployment.containers.iter_mut() {
            let ImageMetadata { is_cluster_local } = deps
                .image_metadata
                .get(&container.image.name)
                .cloned()
                .unwrap_or_default();
            container.image.is_cluster_local = is_cluster_local;
        }

        deployment
    }

    /// The distinct images referenced by this deployment's containers.
    pub fn images(&self) -> impl Iterator<Item = &str> {
        let mut images = self
            .containers
            .iter()
            .map(|c| c.image.name.as_str())
            .collect::<Vec<_>>();
        images.sort_unstable();
        images.dedup();
        images.into_iter()
    }
}

// === impl PortConfig ===

impl PortConfig {
    fn matches(&self, port_ref: &PortRef) -> bool {
        if self.protocol != port_ref.protocol {
            return false;
        }
        match port_ref.port {
            TargetPort::Number(port) => port == self.container_port,
            TargetPort::Name(ref name) => self.name.as_deref() == Some(name.as_str()),
        }
    }
}
