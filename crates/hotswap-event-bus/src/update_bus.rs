//! Update State Event Bus
//!
//! Carries a fresh [`UpdateState`] snapshot to the presentation layer after
//! every mutation made by the update manager.

use hotswap_types::{UpdatePhase, UpdateState};

use super::core::{EventBusContainer, EventBusStats, SubscriptionId};

/// Snapshot broadcast after the manager changes its state
#[derive(Clone, Debug)]
pub struct UpdateStateEvent {
    pub state: UpdateState,
    /// Phase before the change that produced this snapshot.
    pub previous_phase: UpdatePhase,
}

impl UpdateStateEvent {
    pub fn phase_changed(&self) -> bool {
        self.state.phase != self.previous_phase
    }
}

#[derive(Clone)]
pub struct UpdateStateBusContainer {
    inner: EventBusContainer<UpdateStateEvent>,
}

impl UpdateStateBusContainer {
    pub fn new() -> Self {
        Self {
            inner: EventBusContainer::new(),
        }
    }

    /// Subscribe to every state snapshot
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&UpdateStateEvent) + Send + Sync + 'static,
    {
        self.inner.subscribe(move |event| {
            callback(event);
            true
        })
    }

    /// Subscribe to transitions into `phase` only
    pub fn subscribe_phase<F>(&self, phase: UpdatePhase, callback: F) -> SubscriptionId
    where
        F: Fn(&UpdateStateEvent) + Send + Sync + 'static,
    {
        self.inner.subscribe_with_filter(
            move |event| {
                callback(event);
                true
            },
            move |event| event.phase_changed() && event.state.phase == phase,
        )
    }

    pub fn subscribe_once<F>(&self, callback: F) -> SubscriptionId
    where
        F: FnOnce(&UpdateStateEvent) + Send + Sync + 'static,
    {
        self.inner.subscribe_once(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.unsubscribe(id)
    }

    pub fn publish(&self, event: UpdateStateEvent) {
        log::trace!(
            "[UpdateStateBus] Publishing {} -> {} ({:.1}%)",
            event.previous_phase,
            event.state.phase,
            event.state.progress_percent
        );
        self.inner.publish(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscriber_count()
    }

    pub fn stats(&self) -> EventBusStats {
        self.inner.stats()
    }

    pub fn clear(&self) {
        self.inner.clear();
    }
}

impl Default for UpdateStateBusContainer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn event(previous: UpdatePhase, phase: UpdatePhase) -> UpdateStateEvent {
        UpdateStateEvent {
            state: UpdateState {
                phase,
                ..UpdateState::default()
            },
            previous_phase: previous,
        }
    }

    #[test]
    fn test_subscribe_receives_snapshots() {
        let bus = UpdateStateBusContainer::new();
        let received = Arc::new(Mutex::new(Vec::new()));

        let sink = received.clone();
        bus.subscribe(move |event| {
            sink.lock().unwrap().push(event.state.phase);
        });

        bus.publish(event(UpdatePhase::Idle, UpdatePhase::Checking));
        bus.publish(event(UpdatePhase::Checking, UpdatePhase::Downloading));

        assert_eq!(
            *received.lock().unwrap(),
            vec![UpdatePhase::Checking, UpdatePhase::Downloading]
        );
    }

    #[test]
    fn test_subscribe_phase_only_fires_on_entry() {
        let bus = UpdateStateBusContainer::new();
        let hits = Arc::new(Mutex::new(0));

        let counter = hits.clone();
        bus.subscribe_phase(UpdatePhase::Downloading, move |_| {
            *counter.lock().unwrap() += 1;
        });

        bus.publish(event(UpdatePhase::Checking, UpdatePhase::Downloading));
        // Progress ticks keep the phase; they must not re-fire.
        bus.publish(event(UpdatePhase::Downloading, UpdatePhase::Downloading));
        bus.publish(event(UpdatePhase::Downloading, UpdatePhase::Idle));

        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = UpdateStateBusContainer::new();
        let id = bus.subscribe(|_| {});
        assert_eq!(bus.subscriber_count(), 1);

        assert!(bus.unsubscribe(id));
        bus.publish(event(UpdatePhase::Idle, UpdatePhase::Checking));
        assert_eq!(bus.stats().events_delivered, 0);
    }
}
