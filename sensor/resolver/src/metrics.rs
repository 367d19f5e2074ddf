use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct ResolverMetrics {
    events: Counter,
    coalesced: Counter,
    queue_depth: Gauge,
    resolved: Counter,
    dropped: Family<DroppedLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct DroppedLabels {
    reason: &'static str,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum DropReason {
    Stopped,
    NotFound,
    Panicked,
}

// === impl ResolverMetrics ===

impl ResolverMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let events = Counter::default();
        reg.register(
            "events",
            "Count of resource events admitted by the resolver",
            events.clone(),
        );

        let coalesced = Counter::default();
        reg.register(
            "dedup_coalesced",
            "Count of deployment references merged into a pending reference",
            coalesced.clone(),
        );

        let queue_depth = Gauge::default();
        reg.register(
            "dedup_queue_depth",
            "The number of deployments waiting to be resolved",
            queue_depth.clone(),
        );

        let resolved = Counter::default();
        reg.register(
            "resolved",
            "Count of deployments resolved and forwarded",
            resolved.clone(),
        );

        let dropped = Family::default();
        reg.register(
            "dropped",
            "Count of events and deployments dropped without being forwarded",
            dropped.clone(),
        );

        Self {
            events,
            coalesced,
            queue_depth,
            resolved,
            dropped,
        }
    }

    pub(crate) fn event(&self) {
        self.events.inc();
    }

    pub(crate) fn coalesced(&self) {
        self.coalesced.inc();
    }

    pub(crate) fn queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as i64);
    }

    pub(crate) fn resolved(&self) {
        self.resolved.inc();
    }

    pub(crate) fn dropped(&self, reason: DropReason) {
        let reason = match reason {
            DropReason::Stopped => "stopped",
            DropReason::NotFound => "not_found",
            DropReason::Panicked => "panicked",
        };
        self.dropped.get_or_create(&DroppedLabels { reason }).inc();
    }

    #[cfg(test)]
    pub(crate) fn resolved_total(&self) -> u64 {
        self.resolved.get()
    }

    #[cfg(test)]
    pub(crate) fn coalesced_total(&self) -> u64 {
        self.coalesced.get()
    }

    #[cfg(test)]
    pub(crate) fn dropped_total(&self, reason: &'static str) -> u64 {
        self.dropped.get_or_create(&DroppedLabels { reason }).get()
    }
}
