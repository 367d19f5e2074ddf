use crate::resource_id;
use ahash::AHashMap as HashMap;
use anyhow::{Context, Result};
use kube_sensor_core::{
    policy::PolicyType, store::NetworkPolicyStore, Labels, NetworkPolicy, Selector,
};
use kube_sensor_k8s_api::{self as k8s, ResourceExt};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
pub struct NetworkPolicies(RwLock<Index>);

#[derive(Debug, Default)]
struct Index {
    by_id: HashMap<String, Arc<NetworkPolicy>>,
    by_name: HashMap<(String, String), String>,
}

pub(crate) fn convert(policy: k8s::NetworkPolicy) -> Result<NetworkPolicy> {
    let namespace = policy
        .namespace()
        .context("network policy must have a namespace")?;
    let name = policy.name_unchecked();
    let id = resource_id(policy.uid(), &namespace, &name);
    let spec = policy.spec.unwrap_or_default();

    // The pod selector may be omitted since Kubernetes 1.31.
    let pod_selector = Option::<k8s::LabelSelector>::from(spec.pod_selector)
        .map(Selector::try_from)
        .transpose()?
        .unwrap_or_default();

    let policy_types = spec
        .policy_types
        .into_iter()
        .flatten()
        .filter_map(|t| match t.parse::<PolicyType>() {
            Ok(t) => Some(t),
            Err(error) => {
                debug!(%error, "Ignoring policy type");
                None
            }
        })
        .collect();

    Ok(NetworkPolicy {
        id,
        name,
        namespace,
        pod_selector,
        policy_types,
    })
}

// === impl NetworkPolicies ===

impl NetworkPolicies {
    /// Removes the named policy, returning it if it was known.
    pub fn remove_by_name(&self, namespace: &str, name: &str) -> Option<Arc<NetworkPolicy>> {
        let mut index = self.0.write();
        let id = index
            .by_name
            .remove(&(namespace.to_string(), name.to_string()))?;
        index.by_id.remove(&id)
    }

    /// Stores a policy, returning the policy it evicted if the name was reused with a new ID.
    pub fn replace(&self, policy: NetworkPolicy) -> Option<Arc<NetworkPolicy>> {
        let mut index = self.0.write();
        let key = (policy.namespace.clone(), policy.name.clone());
        let replaced = match index.by_name.insert(key, policy.id.clone()) {
            Some(old) if old != policy.id => index.by_id.remove(&old),
            _ => None,
        };
        index.by_id.insert(policy.id.clone(), Arc::new(policy));
        replaced
    }
}

impl NetworkPolicyStore for NetworkPolicies {
    fn find(&self, namespace: &str, labels: &Labels) -> Vec<Arc<NetworkPolicy>> {
        let mut policies = self
            .0
            .read()
            .by_id
            .values()
            .filter(|p| p.namespace == namespace && p.selects(labels))
            .cloned()
            .collect::<Vec<_>>();
        policies.sort_by(|a, b| a.id.cmp(&b.id));
        policies
    }

    fn get(&self, id: &str) -> Option<Arc<NetworkPolicy>> {
        self.0.read().by_id.get(id).cloned()
    }

    fn upsert(&self, policy: NetworkPolicy) {
        self.replace(policy);
    }

    fn delete(&self, id: &str) {
        let mut index = self.0.write();
        if let Some(policy) = index.by_id.remove(id) {
            let key = (policy.namespace.clone(), policy.name.clone());
            if index.by_name.get(&key).map(String::as_str) == Some(id) {
                index.by_name.remove(&key);
            }
        }
    }

    fn all(&self) -> Vec<Arc<NetworkPolicy>> {
        let mut policies = self.0.read().by_id.values().cloned().collect::<Vec<_>>();
        policies.sort_by(|a, b| a.id.cmp(&b.id));
        policies
    }

    fn size(&self) -> usize {
        self.0.read().by_id.len()
    }
}
