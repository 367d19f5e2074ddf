//! Types shared by the sensor's dependency graph, resolver, and stores.
//!
//! Resources are modeled after what the sensor forwards to the control plane rather than the raw
//! Kubernetes objects: a [`Deployment`] carries the pod template labels and containers that
//! selectors and enrichment need, and is merged with [`Dependencies`] before it is forwarded.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod dependencies;
pub mod event;
mod identifier;
mod object;
pub mod policy;
pub mod service;
pub mod store;
pub mod workload;

pub use self::{
    dependencies::{Dependencies, ImageMetadata, PermissionLevel},
    event::{
        DeploymentReference, DetectorMessage, ForwardMessage, OutputQueue, ResolvedEvent,
        ResourceAction, ResourceEvent, Timing,
    },
    identifier::{Identifier, Kind},
    object::Object,
    policy::NetworkPolicy,
    service::{Exposure, ExposureInfo, ExposureLevel, PortRef, Protocol, Service, TargetPort},
    store::{BuildError, BuildState, Stores},
    workload::Deployment,
};
pub use kube_sensor_k8s_api::{Labels, Selector};
