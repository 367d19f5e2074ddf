use crate::resource_id;
use ahash::AHashMap as HashMap;
use anyhow::{Context, Result};
use kube_sensor_core::{
    service::{ServicePort, ServiceType},
    store::ServiceStore,
    Exposure, Labels, Selector, Service, TargetPort,
};
use kube_sensor_k8s_api::{self as k8s, IntOrString, ResourceExt};
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct Services(RwLock<Index>);

#[derive(Debug, Default)]
struct Index {
    by_id: HashMap<String, Arc<Service>>,
    by_name: HashMap<(String, String), String>,
}

pub(crate) fn convert(svc: k8s::Service) -> Result<Service> {
    let namespace = svc.namespace().context("service must have a namespace")?;
    let name = svc.name_unchecked();
    let id = resource_id(svc.uid(), &namespace, &name);
    let spec = svc.spec.unwrap_or_default();

    let service_type = match spec.type_.as_deref() {
        Some("NodePort") => ServiceType::NodePort,
        Some("LoadBalancer") => ServiceType::LoadBalancer,
        Some("ExternalName") => ServiceType::ExternalName,
        _ => ServiceType::ClusterIp,
    };

    let ports = spec
        .ports
        .into_iter()
        .flatten()
        .map(convert_port)
        .collect::<Result<Vec<_>>>()?;

    let ingress = svc
        .status
        .and_then(|status| status.load_balancer)
        .and_then(|lb| lb.ingress)
        .unwrap_or_default();
    let load_balancer_ips = ingress.iter().filter_map(|i| i.ip.clone()).collect();
    let load_balancer_hostnames = ingress.into_iter().filter_map(|i| i.hostname).collect();

    Ok(Service {
        id,
        name,
        namespace,
        selector: spec.selector.map(Selector::from_map),
        service_type,
        ports,
        external_ips: spec.external_ips.unwrap_or_default(),
        load_balancer_ips,
        load_balancer_hostnames,
    })
}

fn convert_port(port: k8s::ServicePort) -> Result<ServicePort> {
    let number =
        u16::try_from(port.port).with_context(|| format!("invalid service port {}", port.port))?;
    let target_port = match port.target_port {
        Some(IntOrString::Int(p)) => TargetPort::Number(
            u16::try_from(p).with_context(|| format!("invalid target port {p}"))?,
        ),
        Some(IntOrString::String(p)) => match p.parse::<u16>() {
            Ok(p) => TargetPort::Number(p),
            Err(_) => TargetPort::Name(p),
        },
        None => TargetPort::Number(number),
    };
    let node_port = port
        .node_port
        .map(u16::try_from)
        .transpose()
        .context("invalid node port")?;
    let protocol = port
        .protocol
        .as_deref()
        .unwrap_or("TCP")
        .parse()
        .map_err(anyhow::Error::msg)?;

    Ok(ServicePort {
        name: port.name,
        port: number,
        target_port,
        node_port,
        protocol,
    })
}

// === impl Services ===

impl Services {
    /// Stores a service, returning the service it evicted if the name was reused with a new ID.
    pub fn upsert(&self, svc: Service) -> Option<Arc<Service>> {
        let mut index = self.0.write();
        let key = (svc.namespace.clone(), svc.name.clone());
        let replaced = match index.by_name.insert(key, svc.id.clone()) {
            Some(old) if old != svc.id => index.by_id.remove(&old),
            _ => None,
        };
        index.by_id.insert(svc.id.clone(), Arc::new(svc));
        replaced
    }

    pub fn remove(&self, namespace: &str, name: &str) -> Option<Arc<Service>> {
        let mut index = self.0.write();
        let id = index
            .by_name
            .remove(&(namespace.to_string(), name.to_string()))?;
        index.by_id.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.0.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().by_id.is_empty()
    }
}

impl ServiceStore for Services {
    fn get_exposure_infos(&self, namespace: &str, labels: &Labels) -> Vec<Exposure> {
        self.find(namespace, labels)
            .iter()
            .map(|svc| svc.exposure())
            .filter(|exposure| !exposure.is_empty())
            .collect()
    }

    fn find(&self, namespace: &str, labels: &Labels) -> Vec<Arc<Service>> {
        let mut services = self
            .0
            .read()
            .by_id
            .values()
            .filter(|svc| svc.namespace == namespace && svc.selects(labels))
            .cloned()
            .collect::<Vec<_>>();
        services.sort_by(|a, b| a.id.cmp(&b.id));
        services
    }

    fn get(&self, id: &str) -> Option<Arc<Service>> {
        self.0.read().by_id.get(id).cloned()
    }
}
