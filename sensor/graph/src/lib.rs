//! Sensor dependency graph
//!
//! The graph tracks how cluster resources depend on one another so that a change to one resource
//! can be mapped to the minimal set of workloads that must be re-evaluated:
//!
//! ```text
//! [ Workload ] -> [ NetworkPolicy ]
//!              -> [ Service ]
//! ```
//!
//! Edges point from a dependant to its dependency. A workload is a dependant of every network
//! policy and service that selects its pods; policies and services have no dependencies of their
//! own. Nodes without dependants are *top-level* nodes and are the units handed to downstream
//! consumers.
//!
//! Edges are discovered lazily through per-kind [`DependencyFinder`]s, which read from the shared
//! [`Stores`](kube_sensor_core::Stores). The graph never mutates stores.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod canonical;
pub mod finder;
mod graph;
pub mod metrics;
mod snapshot;

#[cfg(test)]
mod tests;

pub use self::{
    canonical::CanonicalId,
    finder::{DependencyFinder, FinderRegistry},
    graph::DependencyGraph,
    snapshot::{ClusterSnapshot, SnapshotNode},
};
use kube_sensor_core::Kind;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("no dependency finder is registered for {0}")]
    UnregisteredKind(Kind),

    #[error("expected a {expected} object but found a {found}")]
    UnexpectedObject { expected: Kind, found: Kind },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
