use kube_sensor_core::Identifier;
use std::fmt;

/// The graph key of a resource, formatted as `Kind#Namespace#Id`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CanonicalId(String);

impl CanonicalId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&Identifier> for CanonicalId {
    fn from(id: &Identifier) -> Self {
        Self(format!("{}#{}#{}", id.kind, id.namespace, id.id))
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
