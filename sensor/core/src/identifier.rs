use serde::Serialize;
use std::fmt;

/// The resource kinds tracked by the dependency graph.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Kind {
    Workload,
    NetworkPolicy,
    Service,
}

/// Points at a single logical resource.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Identifier {
    pub kind: Kind,
    pub namespace: String,
    pub id: String,
}

// === impl Kind ===

impl Kind {
    pub const ALL: [Kind; 3] = [Kind::Workload, Kind::NetworkPolicy, Kind::Service];

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Workload => "Workload",
            Kind::NetworkPolicy => "NetworkPolicy",
            Kind::Service => "Service",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl Identifier ===

impl Identifier {
    pub fn new(kind: Kind, namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            id: id.into(),
        }
    }

    pub fn workload(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(Kind::Workload, namespace, id)
    }

    pub fn network_policy(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(Kind::NetworkPolicy, namespace, id)
    }

    pub fn service(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(Kind::Service, namespace, id)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.id)
    }
}
