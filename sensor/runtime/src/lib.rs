#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use kube_sensor_core as core;
pub use kube_sensor_graph as graph;
pub use kube_sensor_k8s_api as k8s;
pub use kube_sensor_k8s_index as index;
pub use kube_sensor_resolver as resolver;

mod args;
mod output;

pub use self::{args::Args, output::LoggingOutput};
