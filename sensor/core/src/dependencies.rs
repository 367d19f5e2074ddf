use crate::service::Exposure;
use serde::Serialize;
use std::collections::BTreeMap;

/// The effective RBAC permissions granted to a workload's service account, from least to most
/// privileged.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum PermissionLevel {
    #[default]
    None,
    Default,
    ElevatedInNamespace,
    ElevatedClusterWide,
    ClusterAdmin,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ImageMetadata {
    /// Set when the image is pulled from a registry hosted inside the cluster.
    pub is_cluster_local: bool,
}

/// Cross-resource context merged into a workload before it is forwarded.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Dependencies {
    pub permission_level: PermissionLevel,

    /// One exposure map per service selecting the workload.
    pub exposures: Vec<Exposure>,

    /// Keyed by the image reference used in the pod spec.
    pub image_metadata: BTreeMap<String, ImageMetadata>,
}

// === impl Dependencies ===

impl Dependencies {
    /// Returns the dependencies in a canonical order so that two bundles describing the same
    /// services compare equal regardless of the order in which stores returned them.
    pub fn normalized(mut self) -> Self {
        for exposure in self.exposures.iter_mut() {
            for infos in exposure.values_mut() {
                for info in infos.iter_mut() {
                    info.external_ips.sort();
                    info.external_hostnames.sort();
                }
                infos.sort();
            }
        }
        self.exposures.sort();
        self
    }
}
