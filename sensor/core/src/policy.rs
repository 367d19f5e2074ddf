use crate::{Labels, Selector};
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NetworkPolicy {
    pub id: String,
    pub name: String,
    pub namespace: String,

    /// An empty selector selects every pod in the namespace.
    pub pod_selector: Selector,

    pub policy_types: Vec<PolicyType>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum PolicyType {
    Ingress,
    Egress,
}

impl NetworkPolicy {
    #[inline]
    pub fn selects(&self, labels: &Labels) -> bool {
        self.pod_selector.matches(labels)
    }
}

impl std::str::FromStr for PolicyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Ingress" => Ok(PolicyType::Ingress),
            "Egress" => Ok(PolicyType::Egress),
            s => Err(format!("unknown policy type: {s}")),
        }
    }
}
