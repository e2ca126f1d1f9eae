//! Over-the-air bundle updater.
//!
//! The [`UpdateManager`] checks a backend for a newer bundle, downloads it
//! behind a crash-safe pending marker, records it, and relaunches the app.

pub mod assets;
pub mod core;

pub use assets::{Assets, get_default_config};
pub use self::core::config::{Config, ProxyConfig, UpdateConfig};
pub use self::core::updater::{
    BundleSource, BundleTransport, LaunchReport, PendingUpdateResult, StartOutcome,
    UpdateBackends, UpdateCheckResult, UpdateChecker, UpdateDownloader, UpdateLedger,
    UpdateManager, UpdateSettings,
};
pub use hotswap_event_bus::{SubscriptionId, UpdateStateBusContainer, UpdateStateEvent};
pub use hotswap_types::{UpdatePhase, UpdateState};
