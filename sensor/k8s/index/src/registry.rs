use ahash::AHashSet as HashSet;
use kube_sensor_core::store::RegistryStore;

/// Recognizes images pulled from registries hosted inside the cluster.
#[derive(Debug, Default)]
pub struct Registries {
    hosts: HashSet<String>,
}

const DEFAULT_REGISTRY: &str = "docker.io";

/// Returns the registry host an image reference is pulled from.
///
/// As with the Docker CLI, the first path component is only a host if it looks like one;
/// otherwise the image is pulled from Docker Hub.
pub fn registry_host(image: &str) -> &str {
    match image.split_once('/') {
        Some((host, _)) if host.contains(['.', ':']) || host == "localhost" => host,
        _ => DEFAULT_REGISTRY,
    }
}

// === impl Registries ===

impl Registries {
    pub fn new(hosts: impl IntoIterator<Item = String>) -> Self {
        Self {
            hosts: hosts
                .into_iter()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
                .collect(),
        }
    }
}

impl RegistryStore for Registries {
    fn is_local(&self, image: &str) -> bool {
        self.hosts.contains(registry_host(image))
    }
}
