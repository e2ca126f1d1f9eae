//! On-disk bundle runtime
//!
//! Layout under the runtime root:
//!
//! ```text
//! staging/<cache_key>.part    bytes of a download in progress
//! bundles/<cache_key>.bundle  installed bundles
//! active.json                 which installed bundle is live
//! ```
//!
//! Installing moves the staged file into `bundles/` and rewrites
//! `active.json` atomically; the next process launch picks it up.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::fs_util::write_atomic;

const ACTIVE_FILE: &str = "active.json";

/// Pointer to the live bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveBundle {
    pub bundle_id: String,
    pub bundle_url: String,
    /// RFC 3339 install time
    pub installed_at: String,
}

/// Read side of the runtime, as the update manager sees it.
#[async_trait]
pub trait BundleRuntime: Send + Sync {
    /// Identifier of the bundle that is currently active, if any.
    async fn current_bundle_id(&self) -> Result<Option<String>>;
}

/// Cache keys become file names; keep them to a boring character set.
fn is_safe_cache_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= 128
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

pub struct FsBundleRuntime {
    root: PathBuf,
}

impl FsBundleRuntime {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn checked_key(cache_key: &str) -> Result<&str> {
        if !is_safe_cache_key(cache_key) {
            bail!("Invalid bundle cache key: {:?}", cache_key);
        }
        Ok(cache_key)
    }

    pub fn staging_path(&self, cache_key: &str) -> Result<PathBuf> {
        let key = Self::checked_key(cache_key)?;
        Ok(self.root.join("staging").join(format!("{}.part", key)))
    }

    pub fn bundle_path(&self, cache_key: &str) -> Result<PathBuf> {
        let key = Self::checked_key(cache_key)?;
        Ok(self.root.join("bundles").join(format!("{}.bundle", key)))
    }

    fn active_path(&self) -> PathBuf {
        self.root.join(ACTIVE_FILE)
    }

    /// Create the staging directory and clear any leftover file for
    /// `cache_key`. Returns the path the transport should write to.
    pub async fn prepare_staging(&self, cache_key: &str) -> Result<PathBuf> {
        let staged = self.staging_path(cache_key)?;
        let dir = self.root.join("staging");
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create staging directory: {:?}", dir))?;
        if tokio::fs::try_exists(&staged).await.unwrap_or(false) {
            tokio::fs::remove_file(&staged)
                .await
                .with_context(|| format!("Failed to clear stale staging file: {:?}", staged))?;
        }
        Ok(staged)
    }

    /// Remove a partially downloaded file. Missing files are fine.
    pub async fn discard_staged(&self, cache_key: &str) {
        let Ok(staged) = self.staging_path(cache_key) else {
            return;
        };
        match tokio::fs::remove_file(&staged).await {
            Ok(()) => log::debug!("[BundleRuntime] Discarded {}", staged.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                "[BundleRuntime] Failed to discard {}: {}",
                staged.display(),
                e
            ),
        }
    }

    /// Promote the staged download for `cache_key` to the active bundle.
    pub async fn install(&self, cache_key: &str, bundle_url: &str) -> Result<ActiveBundle> {
        let staged = self.staging_path(cache_key)?;
        let target = self.bundle_path(cache_key)?;

        let bundles_dir = self.root.join("bundles");
        tokio::fs::create_dir_all(&bundles_dir)
            .await
            .with_context(|| format!("Failed to create bundles directory: {:?}", bundles_dir))?;
        tokio::fs::rename(&staged, &target)
            .await
            .with_context(|| format!("Failed to move {:?} into place", staged))?;

        let active = ActiveBundle {
            bundle_id: cache_key.to_string(),
            bundle_url: bundle_url.to_string(),
            installed_at: Utc::now().to_rfc3339(),
        };
        let content =
            serde_json::to_vec_pretty(&active).context("Failed to serialize active bundle")?;
        let active_path = self.active_path();
        smol::unblock(move || write_atomic(&active_path, &content)).await?;

        log::info!(
            "[BundleRuntime] Installed bundle {} from {}",
            active.bundle_id,
            active.bundle_url
        );

        self.prune_inactive(&active.bundle_id).await;
        Ok(active)
    }

    /// The active bundle pointer, or `None` before the first install.
    pub async fn active_bundle(&self) -> Result<Option<ActiveBundle>> {
        let path = self.active_path();
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {:?}", path));
            }
        };
        let active = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {:?}", path))?;
        Ok(Some(active))
    }

    async fn prune_inactive(&self, keep_id: &str) {
        let dir = self.root.join("bundles");
        let keep = format!("{}.bundle", keep_id);

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("[BundleRuntime] Cannot list {}: {}", dir.display(), e);
                return;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_name().to_string_lossy() == keep {
                continue;
            }
            let path = entry.path();
            if let Err(e) = tokio::fs::remove_file(&path).await {
                log::warn!("[BundleRuntime] Failed to prune {}: {}", path.display(), e);
            }
        }
    }
}

#[async_trait]
impl BundleRuntime for FsBundleRuntime {
    async fn current_bundle_id(&self) -> Result<Option<String>> {
        Ok(self.active_bundle().await?.map(|active| active.bundle_id))
    }
}
