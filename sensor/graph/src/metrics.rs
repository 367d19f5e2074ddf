use crate::DependencyGraph;
use kube_sensor_core::Kind;
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{gauge::ConstGauge, MetricType},
    registry::Registry,
};
use std::sync::Arc;

#[derive(Debug)]
struct Instrumented(Arc<DependencyGraph>);

pub fn register(reg: &mut Registry, graph: Arc<DependencyGraph>) {
    reg.register_collector(Box::new(Instrumented(graph)));
}

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let mut nodes_encoder = encoder.encode_descriptor(
            "nodes",
            "The number of resources tracked by the dependency graph",
            None,
            MetricType::Gauge,
        )?;
        for kind in Kind::ALL {
            let labels = vec![("kind", kind.as_str())];
            let nodes = ConstGauge::new(self.0.len_of_kind(kind) as i64);
            let nodes_encoder = nodes_encoder.encode_family(&labels)?;
            nodes.encode(nodes_encoder)?;
        }

        Ok(())
    }
}
