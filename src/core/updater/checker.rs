use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use hotswap_services::http::build_client;
use hotswap_types::UpdateRecord;
use serde::Deserialize;

use super::StartOutcome;

/// Where the update manager learns about the latest published bundle
#[async_trait]
pub trait BundleSource: Send + Sync {
    /// URL of the latest bundle, `None` when nothing is published.
    async fn latest_bundle_url(&self) -> Result<Option<String>>;
}

/// Result of checking for updates
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateCheckResult {
    /// No connectivity, nothing was asked
    Offline,
    /// Another check or download owns the update cycle
    InProgress,
    /// The published bundle is the one already applied
    NoUpdate,
    /// A new bundle was found and a download was attempted
    UpdateStarted {
        bundle_url: String,
        outcome: StartOutcome,
    },
    /// The backend or the store could not be read
    Failed(String),
}

/// Response body of the "latest bundle" endpoint
#[derive(Debug, Deserialize)]
struct LatestBundleDescriptor {
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// Update checker that queries the backend for the latest bundle
#[derive(Clone)]
pub struct UpdateChecker {
    client: reqwest::Client,
    /// Endpoint returning `{"data": "<bundle url>"}`
    check_url: String,
}

impl UpdateChecker {
    pub fn new(
        check_url: impl Into<String>,
        timeout: Duration,
        proxy_url: Option<&str>,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(Some(timeout), proxy_url)?,
            check_url: check_url.into(),
        })
    }

    /// Create update checker with custom endpoint and a prebuilt client
    pub fn with_client(client: reqwest::Client, check_url: impl Into<String>) -> Self {
        Self {
            client,
            check_url: check_url.into(),
        }
    }

    pub fn check_url(&self) -> &str {
        &self.check_url
    }
}

#[async_trait]
impl BundleSource for UpdateChecker {
    async fn latest_bundle_url(&self) -> Result<Option<String>> {
        log::debug!("[UpdateChecker] GET {}", self.check_url);

        let response = self
            .client
            .get(&self.check_url)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.check_url))?;

        let status = response.status();
        if !status.is_success() {
            bail!("Update server responded with {}", status);
        }

        let body = response
            .text()
            .await
            .context("Failed to read update descriptor")?;
        parse_descriptor(&body)
    }
}

/// Extract the bundle URL from a descriptor body.
///
/// A missing, null, or blank `data` means nothing is published.
pub fn parse_descriptor(body: &str) -> Result<Option<String>> {
    let descriptor: LatestBundleDescriptor =
        serde_json::from_str(body).context("Invalid update descriptor")?;

    match descriptor.data {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(url)) => {
            let url = url.trim();
            Ok((!url.is_empty()).then(|| url.to_string()))
        }
        Some(other) => bail!("Update descriptor `data` must be a string, got {}", other),
    }
}

/// True when `remote` should be downloaded given the last applied record.
pub fn needs_update(stored: Option<&UpdateRecord>, remote: &str) -> bool {
    match stored {
        Some(record) => record.differs_from(remote),
        None => true,
    }
}
