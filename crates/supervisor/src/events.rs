use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use wire::Event;

/// Destination for one subscriber's events — typically a per-connection frame
/// writer. Returns `false` on any write failure so the bus can cancel the
/// subscription without the caller needing to inspect error internals.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: &Event) -> bool;
}

/// Fan-out registry of active subscriptions.
///
/// Slots are stored in a `Vec<Option<_>>` rather than compacted on removal so
/// that a `Subscription`'s index stays valid for its entire lifetime — a
/// cancelled slot is set to `None`, never shifted (Design Note: stable
/// indices). The lock is only ever held for the brief slot lookup/mutation;
/// subscriber callbacks are invoked against a snapshot taken outside the lock.
#[derive(Clone, Default)]
pub struct EventBus {
    slots: Arc<Mutex<Vec<Option<Arc<dyn EventSink>>>>>,
}

pub struct Subscription {
    index: usize,
    bus: EventBus,
}

impl Subscription {
    /// Cancellation is idempotent and safe to call from any thread.
    pub fn cancel(&self) {
        self.bus.cancel(self.index);
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, sink: Arc<dyn EventSink>) -> Subscription {
        let mut slots = self.slots.lock();
        let index = match slots.iter().position(|s| s.is_none()) {
            Some(i) => {
                slots[i] = Some(sink);
                i
            }
            None => {
                slots.push(Some(sink));
                slots.len() - 1
            }
        };
        Subscription {
            index,
            bus: self.clone(),
        }
    }

    fn cancel(&self, index: usize) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(index) {
            *slot = None;
        }
    }

    /// Delivers `event` to every live subscriber. A subscriber whose `emit`
    /// returns `false` is cancelled so it never touches the connection again.
    pub async fn publish(&self, event: Event) {
        let snapshot: Vec<(usize, Arc<dyn EventSink>)> = {
            let slots = self.slots.lock();
            slots
                .iter()
                .enumerate()
                .filter_map(|(i, s)| s.clone().map(|sink| (i, sink)))
                .collect()
        };

        for (index, sink) in snapshot {
            if !sink.emit(&event).await {
                self.cancel(index);
            }
        }
    }

    #[cfg(test)]
    pub fn active_count(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        count: Arc<AtomicUsize>,
        alive: bool,
    }

    #[async_trait]
    impl EventSink for CountingSink {
        async fn emit(&self, _event: &Event) -> bool {
            self.count.fetch_add(1, Ordering::SeqCst);
            self.alive
        }
    }

    fn stdout_event() -> Event {
        Event::Stdout {
            id: "proc-1".into(),
            data: "hi\n".into(),
        }
    }

    #[tokio::test]
    async fn delivers_to_all_live_subscribers() {
        let bus = EventBus::new();
        let count_a = Arc::new(AtomicUsize::new(0));
        let count_b = Arc::new(AtomicUsize::new(0));
        let _sub_a = bus.subscribe(Arc::new(CountingSink {
            count: count_a.clone(),
            alive: true,
        }));
        let _sub_b = bus.subscribe(Arc::new(CountingSink {
            count: count_b.clone(),
            alive: true,
        }));

        bus.publish(stdout_event()).await;

        assert_eq!(count_a.load(Ordering::SeqCst), 1);
        assert_eq!(count_b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let sub = bus.subscribe(Arc::new(CountingSink {
            count: count.clone(),
            alive: true,
        }));

        sub.cancel();
        sub.cancel();
        bus.publish(stdout_event()).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(bus.active_count(), 0);
    }

    #[tokio::test]
    async fn write_failure_auto_cancels_subscription() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let _sub = bus.subscribe(Arc::new(CountingSink {
            count: count.clone(),
            alive: false,
        }));

        bus.publish(stdout_event()).await;
        assert_eq!(bus.active_count(), 0);

        bus.publish(stdout_event()).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_slot_is_reused_keeping_other_indices_stable() {
        let bus = EventBus::new();
        let count_a = Arc::new(AtomicUsize::new(0));
        let count_b = Arc::new(AtomicUsize::new(0));
        let sub_a = bus.subscribe(Arc::new(CountingSink {
            count: count_a.clone(),
            alive: true,
        }));
        let _sub_b = bus.subscribe(Arc::new(CountingSink {
            count: count_b.clone(),
            alive: true,
        }));

        sub_a.cancel();
        bus.publish(stdout_event()).await;
        assert_eq!(count_a.load(Ordering::SeqCst), 0);
        assert_eq!(count_b.load(Ordering::SeqCst), 1);
    }
}
