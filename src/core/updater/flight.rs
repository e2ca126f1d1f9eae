//! Single-flight slot for the update cycle.
//!
//! At most one check or download owns the slot at a time. Ownership is an
//! RAII guard so every exit path, including a dropped future, frees it.

use std::sync::{Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub(crate) enum Flight {
    Checking,
    Downloading {
        bundle_url: String,
        cancel: CancellationToken,
    },
}

impl Flight {
    pub(crate) fn downloading(bundle_url: &str, cancel: CancellationToken) -> Self {
        Flight::Downloading {
            bundle_url: bundle_url.to_string(),
            cancel,
        }
    }

    pub(crate) fn bundle_url(&self) -> Option<&str> {
        match self {
            Flight::Checking => None,
            Flight::Downloading { bundle_url, .. } => Some(bundle_url),
        }
    }
}

#[derive(Default)]
pub(crate) struct FlightSlot {
    slot: Mutex<Option<Flight>>,
}

impl FlightSlot {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Flight>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim the slot, or hand back the flight currently holding it.
    pub(crate) fn try_acquire(&self, flight: Flight) -> Result<FlightGuard<'_>, Flight> {
        let mut slot = self.lock();
        if let Some(active) = slot.as_ref() {
            return Err(active.clone());
        }
        *slot = Some(flight);
        Ok(FlightGuard { owner: self })
    }

    pub(crate) fn current(&self) -> Option<Flight> {
        self.lock().clone()
    }

    /// Cancel the running download, if there is one.
    pub(crate) fn cancel(&self) -> bool {
        match self.lock().as_ref() {
            Some(Flight::Downloading { cancel, .. }) if !cancel.is_cancelled() => {
                cancel.cancel();
                true
            }
            _ => false,
        }
    }
}

pub(crate) struct FlightGuard<'a> {
    owner: &'a FlightSlot,
}

impl FlightGuard<'_> {
    /// Swap the flight this guard holds, e.g. `Checking` → `Downloading`.
    pub(crate) fn promote(&self, flight: Flight) {
        *self.owner.lock() = Some(flight);
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        *self.owner.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_rejected_until_guard_drops() {
        let slot = FlightSlot::new();

        let guard = slot
            .try_acquire(Flight::downloading("b1", CancellationToken::new()))
            .unwrap();
        let active = slot.try_acquire(Flight::Checking).err().unwrap();
        assert_eq!(active.bundle_url(), Some("b1"));

        drop(guard);
        assert!(slot.current().is_none());
        assert!(slot.try_acquire(Flight::Checking).is_ok());
    }

    #[test]
    fn test_promote_keeps_ownership() {
        let slot = FlightSlot::new();
        let guard = slot.try_acquire(Flight::Checking).unwrap();

        guard.promote(Flight::downloading("b2", CancellationToken::new()));
        assert_eq!(
            slot.current().as_ref().and_then(Flight::bundle_url),
            Some("b2")
        );
    }

    #[test]
    fn test_cancel_only_hits_downloads() {
        let slot = FlightSlot::new();
        assert!(!slot.cancel());

        let checking = slot.try_acquire(Flight::Checking).unwrap();
        assert!(!slot.cancel());
        drop(checking);

        let token = CancellationToken::new();
        let _guard = slot
            .try_acquire(Flight::downloading("b1", token.clone()))
            .unwrap();
        assert!(slot.cancel());
        assert!(token.is_cancelled());
        assert!(!slot.cancel());
    }
}
