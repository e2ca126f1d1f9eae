//! Transport vocabulary shared by the manager and bundle transports.

/// One download attempt handed to a bundle transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub bundle_url: String,
    /// Identifier for this attempt; becomes the installed bundle id.
    pub cache_key: String,
    /// Install the bundle as soon as the bytes are on disk.
    pub install_after_download: bool,
}

/// Events a transport emits while a download runs.
///
/// Exactly one terminal event (`Succeeded` or `Failed`) is expected per
/// attempt; anything after the first terminal event is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Progress { received: u64, total: Option<u64> },
    Succeeded,
    Failed { message: String },
}

impl TransportEvent {
    pub fn progress(received: u64, total: Option<u64>) -> Self {
        TransportEvent::Progress { received, total }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        TransportEvent::Failed {
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransportEvent::Progress { .. })
    }
}
