//! In-process typed pub/sub.
//!
//! A thin wrapper over a tokio broadcast channel. The channel's ring buffer
//! gives exactly the backpressure contract the core needs: every subscriber
//! has a bounded view of the stream, a slow subscriber loses the oldest
//! events (surfaced as `RecvError::Lagged`), and publishers never block.
//! Per subscriber, delivery is serialized in publish order; across
//! subscribers it is concurrent.

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::events::Event;

/// Default per-subscriber queue capacity.
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Enqueue an event for all current subscribers. Never blocks.
    pub fn publish(&self, event: Event) {
        let name = event.name();
        match self.tx.send(event) {
            Ok(n) => debug!("published {name} to {n} subscribers"),
            // No subscribers yet; normal during startup and in tests.
            Err(_) => debug!("published {name} with no subscribers"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Receive the next event, logging and skipping over lag gaps.
///
/// Returns `None` once the bus is closed (all senders dropped).
pub async fn next_event(name: &str, rx: &mut broadcast::Receiver<Event>) -> Option<Event> {
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("subscriber {name} lagged, dropped {skipped} events");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}
