use murmur_types::{Event, EventCategory};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

type Callback = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// Registration token returned by [`EventBroker::subscribe`], also used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    category: EventCategory,
}

impl SubscriptionHandle {
    pub fn category(&self) -> EventCategory {
        self.category
    }
}

#[derive(Clone)]
struct Subscriber {
    id: u64,
    callback: Callback,
}

#[derive(Default)]
struct Inner {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<EventCategory, Vec<Subscriber>>>,
}

/// Typed publish/subscribe hub owned by a single session.
///
/// Subscribers of a category run synchronously in registration order. Each
/// publish iterates a snapshot taken under the lock, so callbacks may
/// subscribe or unsubscribe freely without affecting the delivery in flight.
#[derive(Clone, Default)]
pub struct EventBroker {
    inner: Arc<Inner>,
}

impl EventBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, category: EventCategory, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers()
            .entry(category)
            .or_default()
            .push(Subscriber {
                id,
                callback: Arc::new(callback),
            });
        tracing::trace!("subscribed #{} to {}", id, category);
        SubscriptionHandle { id, category }
    }

    /// Subscribes a forwarding callback and returns the receiving end.
    pub fn subscribe_channel(
        &self,
        category: EventCategory,
    ) -> (SubscriptionHandle, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.subscribe(category, move |event| {
            // A dropped receiver only means nobody is listening any more.
            let _ = tx.send(event.clone());
            Ok(())
        });
        (handle, rx)
    }

    /// Returns whether the handle was still registered. Unknown handles are a no-op.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut subscribers = self.subscribers();
        let Some(list) = subscribers.get_mut(&handle.category) else {
            return false;
        };
        let before = list.len();
        list.retain(|subscriber| subscriber.id != handle.id);
        before != list.len()
    }

    /// Delivers `event` to its category and returns how many subscribers handled it cleanly.
    pub fn publish(&self, event: &Event) -> usize {
        let category = event.category();
        let snapshot: Vec<Subscriber> = self
            .subscribers()
            .get(&category)
            .cloned()
            .unwrap_or_default();

        let mut delivered = 0;
        for subscriber in snapshot {
            match catch_unwind(AssertUnwindSafe(|| (subscriber.callback)(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    tracing::warn!(
                        "subscriber #{} for {} failed: {:?}",
                        subscriber.id,
                        category,
                        e
                    );
                }
                Err(_) => {
                    tracing::error!("subscriber #{} for {} panicked", subscriber.id, category);
                }
            }
        }
        delivered
    }

    /// Drops every subscription.
    pub fn clear(&self) {
        self.subscribers().clear();
    }

    pub fn subscriber_count(&self, category: EventCategory) -> usize {
        self.subscribers().get(&category).map_or(0, Vec::len)
    }

    fn subscribers(&self) -> MutexGuard<'_, HashMap<EventCategory, Vec<Subscriber>>> {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_types::events::TranscriptEvent;
    use murmur_types::{DisconnectedEvent, Fault, FaultKind};
    use std::sync::Mutex as StdMutex;

    fn transcript(text: &str) -> Event {
        Event::TranscriptFinal(TranscriptEvent::new(text))
    }

    type Recorded = Box<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

    fn recorder() -> (Arc<StdMutex<Vec<String>>>, impl Fn(&str) -> Recorded) {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let log_for_factory = log.clone();
        let factory = move |name: &str| {
            let log = log_for_factory.clone();
            let name = name.to_string();
            Box::new(move |_: &Event| {
                log.lock().unwrap().push(name.clone());
                Ok(())
            }) as Recorded
        };
        (log, factory)
    }

    #[test]
    fn subscribers_run_in_registration_order() {
        let broker = EventBroker::new();
        let (log, make) = recorder();
        broker.subscribe(EventCategory::TranscriptFinal, make("first"));
        broker.subscribe(EventCategory::TranscriptFinal, make("second"));
        broker.subscribe(EventCategory::TranscriptFinal, make("third"));

        let delivered = broker.publish(&transcript("hello"));

        assert_eq!(delivered, 3);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn publish_only_reaches_the_event_category() {
        let broker = EventBroker::new();
        let (log, make) = recorder();
        broker.subscribe(EventCategory::TranscriptInterim, make("interim"));
        broker.subscribe(EventCategory::Disconnected, make("disconnected"));

        broker.publish(&Event::Disconnected(DisconnectedEvent::new(None)));

        assert_eq!(*log.lock().unwrap(), vec!["disconnected"]);
    }

    #[test]
    fn failing_subscriber_does_not_starve_the_rest() {
        let broker = EventBroker::new();
        let (log, make) = recorder();
        broker.subscribe(EventCategory::Error, make("before"));
        broker.subscribe(EventCategory::Error, |_| Err(anyhow::anyhow!("boom")));
        broker.subscribe(EventCategory::Error, |_| panic!("subscriber bug"));
        broker.subscribe(EventCategory::Error, make("after"));

        let delivered = broker.publish(&Event::Error(Fault::new(FaultKind::Transport, "lost")));

        assert_eq!(delivered, 2);
        assert_eq!(*log.lock().unwrap(), vec!["before", "after"]);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let broker = EventBroker::new();
        let (log, make) = recorder();
        let handle = broker.subscribe(EventCategory::TranscriptFinal, make("gone"));

        assert!(broker.unsubscribe(handle));
        assert!(!broker.unsubscribe(handle));
        broker.clear();
        assert!(!broker.unsubscribe(handle));

        broker.publish(&transcript("ignored"));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn mutation_during_publish_uses_a_stable_snapshot() {
        let broker = EventBroker::new();
        let (log, make) = recorder();

        let late_handle: Arc<StdMutex<Option<SubscriptionHandle>>> = Arc::new(StdMutex::new(None));
        let broker_in_callback = broker.clone();
        let late_for_callback = late_handle.clone();
        let make_late = make("late");
        let make_added = Arc::new(StdMutex::new(Some(make("added"))));
        broker.subscribe(EventCategory::TranscriptFinal, move |_| {
            if let Some(handle) = late_for_callback.lock().unwrap().take() {
                broker_in_callback.unsubscribe(handle);
            }
            if let Some(added) = make_added.lock().unwrap().take() {
                broker_in_callback.subscribe(EventCategory::TranscriptFinal, added);
            }
            Ok(())
        });
        *late_handle.lock().unwrap() =
            Some(broker.subscribe(EventCategory::TranscriptFinal, make_late));

        broker.publish(&transcript("one"));
        // The snapshot still held "late", and "added" joins from the next publish on.
        assert_eq!(*log.lock().unwrap(), vec!["late"]);

        broker.publish(&transcript("two"));
        assert_eq!(*log.lock().unwrap(), vec!["late", "added"]);
    }

    #[tokio::test]
    async fn channel_subscription_forwards_events() {
        let broker = EventBroker::new();
        let (handle, mut rx) = broker.subscribe_channel(EventCategory::TranscriptFinal);

        broker.publish(&transcript("forwarded"));
        broker.unsubscribe(handle);
        broker.publish(&transcript("dropped"));

        assert_eq!(rx.recv().await, Some(transcript("forwarded")));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn clear_removes_every_category() {
        let broker = EventBroker::new();
        for category in EventCategory::ALL {
            broker.subscribe(category, |_| Ok(()));
        }

        broker.clear();

        for category in EventCategory::ALL {
            assert_eq!(broker.subscriber_count(category), 0);
        }
    }
}
