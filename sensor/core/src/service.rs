use crate::{Labels, Selector};
use serde::Serialize;
use std::collections::BTreeMap;

/// Exposure infos for a single service, keyed by the target port they apply to.
pub type Exposure = BTreeMap<PortRef, Vec<ExposureInfo>>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub namespace: String,

    /// Services without a selector (or with an empty one) don't select any workloads.
    pub selector: Option<Selector>,

    pub service_type: ServiceType,
    pub ports: Vec<ServicePort>,
    pub external_ips: Vec<String>,
    pub load_balancer_ips: Vec<String>,
    pub load_balancer_hostnames: Vec<String>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub enum ServiceType {
    #[default]
    ClusterIp,
    NodePort,
    LoadBalancer,
    ExternalName,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ServicePort {
    pub name: Option<String>,
    pub port: u16,
    pub target_port: TargetPort,
    pub node_port: Option<u16>,
    pub protocol: Protocol,
}

/// Identifies a container port targeted by a service.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PortRef {
    pub port: TargetPort,
    pub protocol: Protocol,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum TargetPort {
    Number(u16),
    Name(String),
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ExposureLevel {
    Internal,
    Node,
    External,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ExposureInfo {
    pub level: ExposureLevel,
    pub service_name: String,
    pub service_namespace: String,
    pub service_port: u16,
    pub node_port: Option<u16>,
    pub external_ips: Vec<String>,
    pub external_hostnames: Vec<String>,
}

// === impl Service ===

impl Service {
    pub fn selects(&self, labels: &Labels) -> bool {
        match self.selector {
            Some(ref selector) if !selector.is_empty() => selector.matches(labels),
            _ => false,
        }
    }

    /// Describes how each of the service's target ports is reachable.
    pub fn exposure(&self) -> Exposure {
        let mut exposure = Exposure::new();
        for port in self.ports.iter() {
            let level = match self.service_type {
                ServiceType::ExternalName => continue,
                ServiceType::LoadBalancer => ExposureLevel::External,
                ServiceType::ClusterIp | ServiceType::NodePort if !self.external_ips.is_empty() => {
                    ExposureLevel::External
                }
                ServiceType::NodePort => ExposureLevel::Node,
                ServiceType::ClusterIp => ExposureLevel::Internal,
            };

            let (external_ips, external_hostnames) = match level {
                ExposureLevel::External => {
                    let mut ips = self.external_ips.clone();
                    ips.extend(self.load_balancer_ips.iter().cloned());
                    (ips, self.load_balancer_hostnames.clone())
                }
                _ => (vec![], vec![]),
            };

            let info = ExposureInfo {
                level,
                service_name: self.name.clone(),
                service_namespace: self.namespace.clone(),
                service_port: port.port,
                node_port: port.node_port,
                external_ips,
                external_hostnames,
            };
            exposure
                .entry(PortRef {
                    port: port.target_port.clone(),
                    protocol: port.protocol,
                })
                .or_default()
                .push(info);
        }
        exposure
    }
}

// === impl Protocol ===

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TCP" => Ok(Protocol::Tcp),
            "UDP" => Ok(Protocol::Udp),
            "SCTP" => Ok(Protocol::Sctp),
            s => Err(format!("unsupported protocol: {s}")),
        }
    }
}
