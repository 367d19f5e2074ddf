use futures::prelude::*;
use kube_sensor_core::ResourceEvent;
use parking_lot::Mutex;
use std::{collections::VecDeque, sync::Arc};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Hands the dispatcher's events to a bounded channel.
///
/// Index updates are applied synchronously and can't wait for capacity, so events that don't fit
/// in the channel are held back. Each watch is wrapped with [`Outbox::gate`], which admits the held
/// events into the channel before the watch's next update is read: while the channel is full, no
/// watch makes progress.
#[derive(Clone, Debug)]
pub struct Outbox {
    tx: mpsc::Sender<ResourceEvent>,
    held: Arc<Mutex<VecDeque<ResourceEvent>>>,
}

// === impl Outbox ===

impl Outbox {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ResourceEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let outbox = Self {
            tx,
            held: Default::default(),
        };
        (outbox, rx)
    }

    /// The number of events waiting for channel capacity.
    pub fn held(&self) -> usize {
        self.held.lock().len()
    }

    pub(crate) fn push(&self, event: ResourceEvent) {
        let mut held = self.held.lock();
        if held.is_empty() {
            match self.tx.try_send(event) {
                Ok(()) => return,
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("Event receiver dropped");
                    return;
                }
                Err(mpsc::error::TrySendError::Full(event)) => held.push_back(event),
            }
        } else {
            held.push_back(event);
        }
        trace!(held = held.len(), "Event channel is full");
    }

    /// Waits until every held event has been admitted into the channel.
    pub async fn flush(&self) {
        loop {
            if self.held.lock().is_empty() {
                return;
            }

            let permit = match self.tx.reserve().await {
                Ok(permit) => permit,
                Err(_) => {
                    debug!("Event receiver dropped");
                    self.held.lock().clear();
                    return;
                }
            };

            // Popped and sent under the lock so that `push` can't overtake a held event.
            let mut held = self.held.lock();
            if let Some(event) = held.pop_front() {
                permit.send(event);
            }
        }
    }

    /// Wraps a watch so that held events are flushed before each of its updates is read.
    pub fn gate<S>(&self, updates: S) -> impl Stream<Item = S::Item> + Send + 'static
    where
        S: Stream + Send + 'static,
        S::Item: Send,
    {
        stream::unfold(
            (self.clone(), Box::pin(updates)),
            |(outbox, mut updates)| async move {
                outbox.flush().await;
                let update = updates.next().await?;
                Some((update, (outbox, updates)))
            },
        )
    }
}
