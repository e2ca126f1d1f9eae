//! Typed access to the two durable update records.

use std::sync::Arc;

use anyhow::{Context, Result};
use hotswap_services::{KeyValueStore, StoreOp};
use hotswap_types::{LAST_UPDATED_BUNDLE_KEY, PendingUpdateRecord, UPDATE_PENDING_KEY, UpdateRecord};

#[derive(Clone)]
pub struct UpdateLedger {
    store: Arc<dyn KeyValueStore>,
}

impl UpdateLedger {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// The last bundle installed successfully
    pub async fn last_applied(&self) -> Result<Option<UpdateRecord>> {
        let value = self
            .store
            .get(LAST_UPDATED_BUNDLE_KEY)
            .await
            .context("Failed to read last applied bundle")?;
        Ok(value
            .filter(|v| !v.is_empty())
            .map(UpdateRecord::from_store_value))
    }

    /// The in-flight marker, if a previous run left one behind.
    ///
    /// A marker that no longer parses is removed and reported as absent.
    pub async fn pending(&self) -> Result<Option<PendingUpdateRecord>> {
        let Some(raw) = self
            .store
            .get(UPDATE_PENDING_KEY)
            .await
            .context("Failed to read pending update marker")?
        else {
            return Ok(None);
        };

        match PendingUpdateRecord::from_json(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                log::warn!("[UpdateLedger] Discarding unreadable pending marker: {:#}", e);
                if let Err(e) = self.store.remove(UPDATE_PENDING_KEY).await {
                    log::warn!("[UpdateLedger] Failed to remove unreadable marker: {:#}", e);
                }
                Ok(None)
            }
        }
    }

    /// Write the checkpoint for a download that is about to start.
    pub async fn begin(&self, bundle_url: &str) -> Result<PendingUpdateRecord> {
        let record = PendingUpdateRecord::new(bundle_url);
        self.store
            .set(UPDATE_PENDING_KEY, &record.to_json()?)
            .await
            .context("Failed to persist pending update marker")?;
        Ok(record)
    }

    /// Record `bundle_url` as applied and drop the marker in one commit.
    pub async fn complete(&self, bundle_url: &str) -> Result<UpdateRecord> {
        let record = UpdateRecord::new(bundle_url);
        self.store
            .commit(vec![
                StoreOp::set(LAST_UPDATED_BUNDLE_KEY, record.to_store_value()),
                StoreOp::remove(UPDATE_PENDING_KEY),
            ])
            .await
            .context("Failed to record installed bundle")?;
        Ok(record)
    }

    /// Drop the marker after a failed or cancelled attempt.
    pub async fn abandon(&self) -> Result<()> {
        self.store
            .remove(UPDATE_PENDING_KEY)
            .await
            .context("Failed to clear pending update marker")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotswap_services::MemoryKvStore;

    fn ledger_with(store: Arc<MemoryKvStore>) -> UpdateLedger {
        UpdateLedger::new(store)
    }

    #[tokio::test]
    async fn test_begin_then_complete() {
        let store = Arc::new(MemoryKvStore::new());
        let ledger = ledger_with(store.clone());

        let pending = ledger.begin("b1").await.unwrap();
        assert_eq!(ledger.pending().await.unwrap(), Some(pending));

        ledger.complete("b1").await.unwrap();
        assert_eq!(ledger.pending().await.unwrap(), None);
        assert_eq!(
            ledger.last_applied().await.unwrap(),
            Some(UpdateRecord::new("b1"))
        );
        assert_eq!(store.peek(LAST_UPDATED_BUNDLE_KEY).as_deref(), Some("b1"));
    }

    #[tokio::test]
    async fn test_abandon_keeps_last_applied() {
        let store = Arc::new(MemoryKvStore::with_entries([(LAST_UPDATED_BUNDLE_KEY, "b0")]));
        let ledger = ledger_with(store);

        ledger.begin("b3").await.unwrap();
        ledger.abandon().await.unwrap();

        assert_eq!(ledger.pending().await.unwrap(), None);
        assert_eq!(
            ledger.last_applied().await.unwrap(),
            Some(UpdateRecord::new("b0"))
        );
    }

    #[tokio::test]
    async fn test_unreadable_marker_is_discarded() {
        let store = Arc::new(MemoryKvStore::with_entries([(UPDATE_PENDING_KEY, "{oops")]));
        let ledger = ledger_with(store.clone());

        assert_eq!(ledger.pending().await.unwrap(), None);
        assert_eq!(store.peek(UPDATE_PENDING_KEY), None);
    }

    #[tokio::test]
    async fn test_empty_last_applied_counts_as_absent() {
        let store = Arc::new(MemoryKvStore::with_entries([(LAST_UPDATED_BUNDLE_KEY, "")]));
        let ledger = ledger_with(store);

        assert_eq!(ledger.last_applied().await.unwrap(), None);
    }
}
