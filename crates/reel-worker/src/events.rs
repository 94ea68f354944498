//! Broadcast channel for pipeline events.

use tokio::sync::broadcast;
use tracing::trace;

use reel_models::PipelineEvent;

const DEFAULT_CAPACITY: usize = 256;

/// Fan-out of [`PipelineEvent`]s to any number of subscribers.
///
/// Publishing never fails: with no subscribers the event is dropped, and a
/// slow subscriber skips ahead instead of blocking the pipeline.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: PipelineEvent) {
        if self.tx.send(event).is_err() {
            trace!("No event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }
}
