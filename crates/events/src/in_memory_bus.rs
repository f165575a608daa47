//! In-memory event bus for tests/dev.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::bus::{Accept, EventBus, Subscription, SubscriptionHandle};

#[derive(Debug, thiserror::Error)]
pub enum InMemoryBusError {
    /// Publish failed due to internal lock poisoning.
    #[error("event bus lock poisoned")]
    Poisoned,
}

struct Subscriber<M> {
    id: u64,
    accept: Accept<M>,
    sender: mpsc::UnboundedSender<M>,
}

/// In-memory pub/sub bus.
///
/// - No IO
/// - Best-effort fan-out, publish never blocks
/// - Cancelled or dropped subscribers are pruned
pub struct InMemoryEventBus<M> {
    subscribers: Arc<Mutex<Vec<Subscriber<M>>>>,
    next_id: AtomicU64,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .map(|subs| subs.iter().filter(|s| !s.sender.is_closed()).count())
            .unwrap_or(0)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<M> core::fmt::Debug for InMemoryEventBus<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryEventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut subs = self.subscribers.lock().map_err(|_| InMemoryBusError::Poisoned)?;

        // Drop any dead subscribers while publishing.
        subs.retain(|sub| {
            if !(sub.accept)(&message) {
                return !sub.sender.is_closed();
            }
            sub.sender.send(message.clone()).is_ok()
        });

        Ok(())
    }

    fn subscribe_where(&self, accept: Accept<M>) -> Subscription<M> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        // If the lock is poisoned, we still return a subscription;
        // it just won't receive messages.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(Subscriber { id, accept, sender: tx });
        }

        let registry = Arc::downgrade(&self.subscribers);
        let handle = SubscriptionHandle::new(move || {
            if let Some(registry) = registry.upgrade() {
                if let Ok(mut subs) = registry.lock() {
                    subs.retain(|s| s.id != id);
                }
            }
        });

        Subscription::new(rx, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fans_out_to_accepting_subscribers_only() {
        let bus: InMemoryEventBus<u32> = InMemoryEventBus::new();
        let mut all = bus.subscribe();
        let mut even = bus.subscribe_where(Box::new(|n: &u32| n % 2 == 0));

        bus.publish(1).unwrap();
        bus.publish(2).unwrap();

        assert_eq!(all.recv().await, Some(1));
        assert_eq!(all.recv().await, Some(2));
        assert_eq!(even.recv().await, Some(2));
        assert_eq!(even.try_recv(), None);
    }

    #[tokio::test]
    async fn cancelled_subscribers_are_removed() {
        let bus: InMemoryEventBus<u32> = InMemoryEventBus::new();
        let sub = bus.subscribe();
        let kept = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        sub.handle().cancel();
        assert_eq!(bus.subscriber_count(), 1);

        drop(kept);
        bus.publish(7).unwrap();
        assert_eq!(bus.subscriber_count(), 0);
    }
}
