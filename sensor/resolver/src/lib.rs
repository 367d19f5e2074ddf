//! Sensor resolver
//!
//! Turns a stream of lightweight "something changed" notifications into enriched, de-duplicated
//! workloads. Events flow through two stages, each driven by its own task:
//!
//! ```text
//! send() -> [ events ] -> expansion -> [ DedupQueue ] -> resolution -> OutputQueue
//! ```
//!
//! The expansion stage evaluates each lazy [`DeploymentReference`] against the live workload
//! store and queues the resulting IDs. References to an ID that is already pending are merged into
//! the pending entry, so a burst of changes touching the same workload causes a single rebuild.
//! The resolution stage rebuilds one workload at a time by merging its RBAC, service, and image
//! dependencies.
//!
//! [`DeploymentReference`]: kube_sensor_core::DeploymentReference

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod dedup;
mod metrics;
mod resolver;


pub use self::{
    dedup::{Dedup, DedupQueue, Pushed},
    metrics::ResolverMetrics,
    resolver::{Config, Resolver},
};
