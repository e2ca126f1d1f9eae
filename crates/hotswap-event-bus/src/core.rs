//! Generic event bus core.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Handle returned by `subscribe*`, used to unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Callback returns `true` to stay subscribed, `false` to drop itself.
type Callback<T> = Arc<dyn Fn(&T) -> bool + Send + Sync + 'static>;
type Filter<T> = Arc<dyn Fn(&T) -> bool + Send + Sync + 'static>;

/// Subscribers captured for one delivery, run without the bus borrowed.
struct Delivery<T> {
    id: SubscriptionId,
    callback: Callback<T>,
    filter: Option<Filter<T>>,
}

impl<T> Delivery<T> {
    /// Run the subscriber if its filter accepts `event`.
    ///
    /// Returns `None` when filtered out, otherwise whether it stays subscribed.
    fn deliver(&self, event: &T) -> Option<bool> {
        if let Some(filter) = &self.filter {
            if !filter(event) {
                return None;
            }
        }
        Some((self.callback)(event))
    }
}

struct Subscription<T> {
    id: SubscriptionId,
    callback: Callback<T>,
    filter: Option<Filter<T>>,
}

/// Delivery counters for a bus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventBusStats {
    pub events_published: u64,
    pub events_delivered: u64,
    pub active_subscriptions: usize,
}

pub struct EventBus<T> {
    subscriptions: Vec<Subscription<T>>,
    next_id: u64,
    events_published: u64,
    events_delivered: u64,
}

impl<T> EventBus<T> {
    pub fn new() -> Self {
        Self {
            subscriptions: Vec::new(),
            next_id: 1,
            events_published: 0,
            events_delivered: 0,
        }
    }

    fn allocate_id(&mut self) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let id = self.allocate_id();
        self.subscriptions.push(Subscription {
            id,
            callback: Arc::new(callback),
            filter: None,
        });
        id
    }

    /// Subscribe to events matching `filter` only
    pub fn subscribe_with_filter<F, P>(&mut self, callback: F, filter: P) -> SubscriptionId
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let id = self.allocate_id();
        self.subscriptions.push(Subscription {
            id,
            callback: Arc::new(callback),
            filter: Some(Arc::new(filter)),
        });
        id
    }

    /// Subscribe for exactly one event
    pub fn subscribe_once<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnOnce(&T) + Send + Sync + 'static,
    {
        let slot = Mutex::new(Some(callback));
        self.subscribe(move |event| {
            let callback = slot.lock().ok().and_then(|mut guard| guard.take());
            if let Some(callback) = callback {
                callback(event);
            }
            false
        })
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|sub| sub.id != id);
        self.subscriptions.len() != before
    }

    /// Deliver `event` to every matching subscriber.
    ///
    /// Subscribers whose callback returns `false` are removed afterwards.
    pub fn publish(&mut self, event: &T) {
        let deliveries = self.begin_delivery();
        let (delivered, finished) = run_deliveries(&deliveries, event);
        self.finish_delivery(delivered, &finished);
    }

    /// Count the event and capture the current subscribers.
    fn begin_delivery(&mut self) -> Vec<Delivery<T>> {
        self.events_published += 1;
        self.subscriptions
            .iter()
            .map(|sub| Delivery {
                id: sub.id,
                callback: sub.callback.clone(),
                filter: sub.filter.clone(),
            })
            .collect()
    }

    fn finish_delivery(&mut self, delivered: u64, finished: &[SubscriptionId]) {
        self.events_delivered += delivered;
        if !finished.is_empty() {
            self.subscriptions.retain(|sub| !finished.contains(&sub.id));
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn stats(&self) -> EventBusStats {
        EventBusStats {
            events_published: self.events_published,
            events_delivered: self.events_delivered,
            active_subscriptions: self.subscriptions.len(),
        }
    }

    pub fn clear(&mut self) {
        self.subscriptions.clear();
    }
}

fn run_deliveries<T>(deliveries: &[Delivery<T>], event: &T) -> (u64, Vec<SubscriptionId>) {
    let mut delivered = 0;
    let mut finished = Vec::new();
    for delivery in deliveries {
        match delivery.deliver(event) {
            None => {}
            Some(keep) => {
                delivered += 1;
                if !keep {
                    finished.push(delivery.id);
                }
            }
        }
    }
    (delivered, finished)
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe, cloneable handle around an [`EventBus`].
pub struct EventBusContainer<T> {
    bus: Arc<Mutex<EventBus<T>>>,
}

impl<T> Clone for EventBusContainer<T> {
    fn clone(&self) -> Self {
        Self {
            bus: self.bus.clone(),
        }
    }
}

impl<T> EventBusContainer<T> {
    pub fn new() -> Self {
        Self {
            bus: Arc::new(Mutex::new(EventBus::new())),
        }
    }

    // A panicking subscriber must not take the bus down with it.
    fn lock(&self) -> MutexGuard<'_, EventBus<T>> {
        self.bus.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.lock().subscribe(callback)
    }

    pub fn subscribe_with_filter<F, P>(&self, callback: F, filter: P) -> SubscriptionId
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.lock().subscribe_with_filter(callback, filter)
    }

    pub fn subscribe_once<F>(&self, callback: F) -> SubscriptionId
    where
        F: FnOnce(&T) + Send + Sync + 'static,
    {
        self.lock().subscribe_once(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.lock().unsubscribe(id)
    }

    /// Deliver `event` with the bus unlocked, so subscribers may subscribe,
    /// unsubscribe, or publish from inside their callback.
    pub fn publish(&self, event: T) {
        let deliveries = self.lock().begin_delivery();
        let (delivered, finished) = run_deliveries(&deliveries, &event);
        self.lock().finish_delivery(delivered, &finished);
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscriber_count()
    }

    pub fn stats(&self) -> EventBusStats {
        self.lock().stats()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl<T> Default for EventBusContainer<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_publish_reaches_all_subscribers() {
        let bus: EventBusContainer<u32> = EventBusContainer::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let hits = hits.clone();
            bus.subscribe(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
                true
            });
        }

        bus.publish(7);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(bus.stats().events_published, 1);
        assert_eq!(bus.stats().events_delivered, 3);
    }

    #[test]
    fn test_filter_skips_non_matching_events() {
        let bus: EventBusContainer<u32> = EventBusContainer::new();
        let received = Arc::new(Mutex::new(Vec::new()));

        let sink = received.clone();
        bus.subscribe_with_filter(
            move |value| {
                sink.lock().unwrap().push(*value);
                true
            },
            |value| value % 2 == 0,
        );

        for value in 1..=6 {
            bus.publish(value);
        }

        assert_eq!(*received.lock().unwrap(), vec![2, 4, 6]);
    }

    #[test]
    fn test_subscribe_once_fires_a_single_time() {
        let bus: EventBusContainer<&'static str> = EventBusContainer::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        bus.subscribe_once(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish("a");
        bus.publish("b");

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_unsubscribe() {
        let bus: EventBusContainer<u32> = EventBusContainer::new();
        let id = bus.subscribe(|_| true);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_callback_returning_false_unsubscribes() {
        let bus: EventBusContainer<u32> = EventBusContainer::new();
        bus.subscribe(|value| *value < 2);

        bus.publish(1);
        assert_eq!(bus.subscriber_count(), 1);
        bus.publish(5);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_callbacks_can_reenter_the_bus() {
        let bus: EventBusContainer<u32> = EventBusContainer::new();
        let late_hits = Arc::new(AtomicUsize::new(0));

        let handle = bus.clone();
        let hits = late_hits.clone();
        bus.subscribe_once(move |value| {
            let hits = hits.clone();
            handle.subscribe(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
                true
            });
            if *value < 10 {
                handle.publish(value + 10);
            }
        });

        let handle = bus.clone();
        let victim = bus.subscribe(|_| true);
        bus.subscribe_once(move |_| {
            handle.unsubscribe(victim);
        });

        bus.publish(1);

        // Only the late subscriber is left, and it saw the nested publish.
        assert_eq!(bus.subscriber_count(), 1);
        assert!(!bus.unsubscribe(victim));
        assert_eq!(late_hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.stats().events_published, 2);
    }

    #[test]
    fn test_subscription_ids_are_unique() {
        let bus: EventBusContainer<u32> = EventBusContainer::new();
        let a = bus.subscribe(|_| true);
        let b = bus.subscribe(|_| true);
        assert_ne!(a, b);

        bus.clear();
        assert_eq!(bus.stats().active_subscriptions, 0);
    }
}
