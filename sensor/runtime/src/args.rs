use crate::{
    core::ResourceEvent,
    graph::{self, DependencyGraph, FinderRegistry},
    index::{Dispatcher, Index, IndexMetrics, Outbox},
    k8s,
    resolver::{self, Resolver, ResolverMetrics},
    LoggingOutput,
};
use anyhow::{bail, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "sensor", about = "Resolves workload dependencies in a Kubernetes cluster")]
pub struct Args {
    #[clap(
        long,
        default_value = "kube_sensor=info,warn",
        env = "KUBE_SENSOR_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The number of resource events buffered ahead of the resolver before watches stall.
    #[clap(long, default_value = "1000")]
    event_buffer_size: usize,

    /// The number of distinct deployments that may wait for resolution.
    #[clap(long, default_value = "1000")]
    dedup_queue_size: usize,

    /// Registry hosts, e.g. `image-registry.openshift-image-registry.svc:5000`, whose images are
    /// considered local to the cluster.
    #[clap(long, value_delimiter = ',')]
    cluster_local_registries: Vec<String>,

    #[clap(long, default_value = "default")]
    cluster_name: String,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            event_buffer_size,
            dedup_queue_size,
            cluster_local_registries,
            cluster_name,
        } = self;

        let index = Index::new(cluster_local_registries);
        let graph = Arc::new(DependencyGraph::new(
            FinderRegistry::builtin(),
            index.stores(),
        ));

        let mut prom = <Registry>::default();
        graph::metrics::register(prom.sub_registry_with_prefix("graph"), graph.clone());
        let resolver_metrics = ResolverMetrics::register(prom.sub_registry_with_prefix("resolver"));
        let output = LoggingOutput::register(prom.sub_registry_with_prefix("output"));
        let (outbox, events_rx) = Outbox::channel(event_buffer_size);
        let dispatcher = IndexMetrics::register(
            Dispatcher::new(index.clone(), graph, outbox.clone()).shared(),
            prom.sub_registry_with_prefix("index"),
        )
        .shared();
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let resolver = Resolver::new(
            index.stores(),
            Arc::new(output),
            resolver::Config {
                event_buffer_size,
                dedup_queue_size,
            },
            resolver_metrics,
        );
        resolver.start()?;
        info!(cluster = %cluster_name, "Resolver started");

        // Spawn resource watches.

        let deployments = runtime.watch_all::<k8s::Deployment>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(dispatcher.clone(), outbox.gate(deployments))
                .instrument(info_span!("deployments")),
        );

        let network_policies = runtime.watch_all::<k8s::NetworkPolicy>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(dispatcher.clone(), outbox.gate(network_policies))
                .instrument(info_span!("networkpolicies")),
        );

        let services = runtime.watch_all::<k8s::Service>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(dispatcher.clone(), outbox.gate(services))
                .instrument(info_span!("services")),
        );

        let roles = runtime.watch_all::<k8s::Role>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(dispatcher.clone(), outbox.gate(roles))
                .instrument(info_span!("roles")),
        );

        let role_bindings = runtime.watch_all::<k8s::RoleBinding>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(dispatcher.clone(), outbox.gate(role_bindings))
                .instrument(info_span!("rolebindings")),
        );

        let cluster_roles = runtime.watch_all::<k8s::ClusterRole>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(dispatcher.clone(), outbox.gate(cluster_roles))
                .instrument(info_span!("clusterroles")),
        );

        let cluster_role_bindings =
            runtime.watch_all::<k8s::ClusterRoleBinding>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(dispatcher, outbox.gate(cluster_role_bindings))
                .instrument(info_span!("clusterrolebindings")),
        );

        // Feed watch events to the resolver until the runtime shuts down.
        tokio::spawn(
            pump(resolver, events_rx, runtime.shutdown_handle())
                .instrument(info_span!("sensor", cluster = %cluster_name)),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

async fn pump(
    resolver: Resolver,
    mut events: mpsc::Receiver<ResourceEvent>,
    drain: drain::Watch,
) {
    tokio::pin! {
        let shutdown = drain.signaled();
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => resolver.send(event).await,
                None => {
                    debug!("Watches completed");
                    resolver.stop(None).await;
                    return;
                }
            },

            handle = &mut shutdown => {
                handle.release_after(resolver.stop(None)).await;
                return;
            }
        }
    }
}
