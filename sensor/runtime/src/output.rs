use crate::core::{OutputQueue, ResolvedEvent};
use prometheus_client::{metrics::counter::Counter, registry::Registry};
use tracing::{debug, warn};

/// Writes resolved events to the log in place of a control-plane connection.
#[derive(Clone, Debug, Default)]
pub struct LoggingOutput {
    forwarded: Counter,
    detected: Counter,
}

// === impl LoggingOutput ===

impl LoggingOutput {
    pub fn register(reg: &mut Registry) -> Self {
        let forwarded = Counter::default();
        reg.register(
            "forwarded",
            "Count of messages forwarded to the control plane",
            forwarded.clone(),
        );

        let detected = Counter::default();
        reg.register(
            "detected",
            "Count of deployments handed to the detector",
            detected.clone(),
        );

        Self {
            forwarded,
            detected,
        }
    }
}

impl OutputQueue for LoggingOutput {
    fn send(&self, event: ResolvedEvent) {
        for msg in event.forward_messages.iter() {
            self.forwarded.inc();
            match serde_json::to_string(msg) {
                Ok(json) => {
                    debug!(action = ?msg.action, kind = %msg.object.kind(), %json, "Forwarding")
                }
                Err(error) => warn!(%error, "Failed to encode message"),
            }
        }

        for msg in event.detector_messages.iter() {
            self.detected.inc();
            debug!(action = ?msg.action, id = %msg.object.id, "Detecting");
        }
    }
}
