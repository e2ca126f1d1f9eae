//! Network reachability
//!
//! Every gated update operation asks a [`NetworkProbe`] first. Anything other
//! than [`NetworkStatus::Connected`] is treated as offline.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::http::build_client;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Connected,
    Disconnected,
    Unknown,
}

impl NetworkStatus {
    pub fn is_connected(self) -> bool {
        matches!(self, NetworkStatus::Connected)
    }
}

#[async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn status(&self) -> NetworkStatus;

    async fn is_connected(&self) -> bool {
        self.status().await.is_connected()
    }
}

/// Probe that reports connected when `probe_url` answers with any HTTP
/// response within the timeout.
pub struct HttpReachabilityProbe {
    client: reqwest::Client,
    probe_url: String,
}

impl HttpReachabilityProbe {
    pub fn new(probe_url: impl Into<String>, timeout: Duration, proxy_url: Option<&str>) -> Result<Self> {
        Ok(Self {
            client: build_client(Some(timeout), proxy_url)?,
            probe_url: probe_url.into(),
        })
    }
}

#[async_trait]
impl NetworkProbe for HttpReachabilityProbe {
    async fn status(&self) -> NetworkStatus {
        match self.client.head(&self.probe_url).send().await {
            Ok(response) => {
                log::debug!(
                    "[NetworkProbe] {} answered {}",
                    self.probe_url,
                    response.status()
                );
                NetworkStatus::Connected
            }
            Err(e) if e.is_builder() => {
                log::error!("[NetworkProbe] Invalid probe URL {}: {}", self.probe_url, e);
                NetworkStatus::Unknown
            }
            Err(e) => {
                log::debug!("[NetworkProbe] {} unreachable: {}", self.probe_url, e);
                NetworkStatus::Disconnected
            }
        }
    }
}

/// Probe whose answer is set by hand.
pub struct StaticNetworkProbe {
    status: AtomicU8,
}

impl StaticNetworkProbe {
    pub fn new(status: NetworkStatus) -> Self {
        Self {
            status: AtomicU8::new(Self::encode(status)),
        }
    }

    pub fn online() -> Self {
        Self::new(NetworkStatus::Connected)
    }

    pub fn offline() -> Self {
        Self::new(NetworkStatus::Disconnected)
    }

    pub fn set_status(&self, status: NetworkStatus) {
        self.status.store(Self::encode(status), Ordering::SeqCst);
    }

    pub fn set_connected(&self, connected: bool) {
        self.set_status(if connected {
            NetworkStatus::Connected
        } else {
            NetworkStatus::Disconnected
        });
    }

    fn encode(status: NetworkStatus) -> u8 {
        match status {
            NetworkStatus::Connected => 0,
            NetworkStatus::Disconnected => 1,
            NetworkStatus::Unknown => 2,
        }
    }

    fn decode(raw: u8) -> NetworkStatus {
        match raw {
            0 => NetworkStatus::Connected,
            1 => NetworkStatus::Disconnected,
            _ => NetworkStatus::Unknown,
        }
    }
}

#[async_trait]
impl NetworkProbe for StaticNetworkProbe {
    async fn status(&self) -> NetworkStatus {
        Self::decode(self.status.load(Ordering::SeqCst))
    }
}
