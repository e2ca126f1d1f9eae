//! Over-the-air bundle updates.
//!
//! [`UpdateManager`] owns the whole cycle: check the backend for a newer
//! bundle, download it with a crash-safe pending marker, record it as
//! applied, then relaunch. Only one check or download runs at a time.

mod checker;
mod downloader;
mod flight;
mod ledger;


use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use hotswap_event_bus::{SubscriptionId, UpdateStateBusContainer, UpdateStateEvent};
use hotswap_services::{
    BundleRuntime, FileKvStore, FsBundleRuntime, HttpReachabilityProbe, KeyValueStore,
    NetworkProbe, ProcessRestartTrigger, RestartTrigger,
};
use hotswap_types::{DownloadRequest, PendingUpdateRecord, TransportEvent, UpdatePhase, UpdateState};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::config::{Config, DEFAULT_SETTLE_DELAY_MS, UpdateConfig};
use crate::core::config_manager;

pub use checker::{BundleSource, UpdateCheckResult, UpdateChecker, needs_update, parse_descriptor};
pub use downloader::{BundleTransport, UpdateDownloader};
pub use ledger::UpdateLedger;

use flight::{Flight, FlightGuard, FlightSlot};

/// How a request to download a specific bundle ended
#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    /// No connectivity, nothing was touched
    Offline,
    /// Empty or blank bundle URL
    InvalidUrl,
    /// Another check or download owns the update cycle
    AlreadyInFlight { active_url: Option<String> },
    /// A relaunch is already scheduled
    RestartPending,
    /// Downloaded, recorded, and a relaunch is scheduled
    Installed { bundle_url: String },
    /// The transport reported a failure; the marker was cleared
    DownloadFailed { bundle_url: String, message: String },
    /// `cancel_update` stopped the transfer
    Cancelled { bundle_url: String },
    /// Stopped by a persistence or transport-initiation error
    Aborted { bundle_url: String, message: String },
}

impl StartOutcome {
    pub fn is_installed(&self) -> bool {
        matches!(self, StartOutcome::Installed { .. })
    }
}

/// Result of replaying an interrupted download
#[derive(Debug, Clone, PartialEq)]
pub enum PendingUpdateResult {
    Offline,
    NothingPending,
    Resumed(StartOutcome),
    Failed(String),
}

/// What the launch sequence did
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchReport {
    pub current_bundle_id: Option<String>,
    pub pending: PendingUpdateResult,
    pub check: UpdateCheckResult,
}

/// Tunables for the update cycle
#[derive(Debug, Clone)]
pub struct UpdateSettings {
    /// Pause between a successful install and the relaunch
    pub settle_delay: Duration,
    /// Cancel a download that reports nothing for this long
    pub stall_timeout: Option<Duration>,
    pub install_after_download: bool,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
            stall_timeout: None,
            install_after_download: true,
        }
    }
}

impl UpdateSettings {
    pub fn from_config(config: &UpdateConfig) -> Self {
        Self {
            settle_delay: config.settle_delay(),
            stall_timeout: config.stall_timeout(),
            install_after_download: config.install_after_download,
        }
    }
}

/// Platform collaborators the manager drives
#[derive(Clone)]
pub struct UpdateBackends {
    pub store: Arc<dyn KeyValueStore>,
    pub probe: Arc<dyn NetworkProbe>,
    pub source: Arc<dyn BundleSource>,
    pub transport: Arc<dyn BundleTransport>,
    pub runtime: Arc<dyn BundleRuntime>,
    pub restart: Arc<dyn RestartTrigger>,
}

/// How the transport's event stream ended
#[derive(Debug)]
enum TransferOutcome {
    Succeeded,
    Failed(String),
    Stalled(Duration),
    /// Transport returned without a terminal event
    Unreported,
}

/// Slot ownership for one check or download.
///
/// Dropping it, including when the cycle future is dropped mid-flight,
/// returns an unfinished phase to `Idle` before the slot is freed.
struct CycleGuard<'a> {
    manager: &'a UpdateManager,
    flight: FlightGuard<'a>,
}

impl CycleGuard<'_> {
    fn promote(&self, flight: Flight) {
        self.flight.promote(flight);
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        if self.manager.state().is_in_flight() {
            log::warn!("[UpdateManager] Update cycle dropped before finishing");
        }
        self.manager.update_state(UpdateState::settle_interrupted);
    }
}

struct ManagerInner {
    state: Mutex<UpdateState>,
    bus: UpdateStateBusContainer,
    ledger: UpdateLedger,
    probe: Arc<dyn NetworkProbe>,
    source: Arc<dyn BundleSource>,
    transport: Arc<dyn BundleTransport>,
    runtime: Arc<dyn BundleRuntime>,
    restart: Arc<dyn RestartTrigger>,
    settings: UpdateSettings,
    flight: FlightSlot,
    restart_scheduled: AtomicBool,
    restart_task: Mutex<Option<JoinHandle<()>>>,
}

/// Update manager - coordinates checking, downloading, and relaunching.
///
/// Cheap to clone; clones share one state and one single-flight slot.
#[derive(Clone)]
pub struct UpdateManager {
    inner: Arc<ManagerInner>,
}

impl UpdateManager {
    pub fn new(backends: UpdateBackends, settings: UpdateSettings) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                state: Mutex::new(UpdateState::new()),
                bus: UpdateStateBusContainer::new(),
                ledger: UpdateLedger::new(backends.store),
                probe: backends.probe,
                source: backends.source,
                transport: backends.transport,
                runtime: backends.runtime,
                restart: backends.restart,
                settings,
                flight: FlightSlot::new(),
                restart_scheduled: AtomicBool::new(false),
                restart_task: Mutex::new(None),
            }),
        }
    }

    /// Wire the production backends from config.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let update = &config.update;
        let proxy_url = config.proxy.to_proxy_url();
        let proxy_url = proxy_url.as_deref();

        let store = FileKvStore::open(config_manager::get_state_file_path(config)).await?;
        let runtime = Arc::new(FsBundleRuntime::new(config_manager::get_bundles_dir(config)));

        let backends = UpdateBackends {
            store: Arc::new(store),
            probe: Arc::new(HttpReachabilityProbe::new(
                update.probe_url(),
                update.probe_timeout(),
                proxy_url,
            )?),
            source: Arc::new(UpdateChecker::new(
                update.check_url(),
                update.request_timeout(),
                proxy_url,
            )?),
            transport: Arc::new(UpdateDownloader::new(runtime.clone(), proxy_url)?),
            runtime,
            restart: Arc::new(ProcessRestartTrigger::current()?),
        };

        Ok(Self::new(backends, UpdateSettings::from_config(update)))
    }

    /// Snapshot of the current state
    pub fn state(&self) -> UpdateState {
        self.lock_state().clone()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&UpdateStateEvent) + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(callback)
    }

    /// Notify only when the cycle enters `phase`
    pub fn subscribe_phase<F>(&self, phase: UpdatePhase, callback: F) -> SubscriptionId
    where
        F: Fn(&UpdateStateEvent) + Send + Sync + 'static,
    {
        self.inner.bus.subscribe_phase(phase, callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.bus.unsubscribe(id)
    }

    /// Ask the runtime which bundle is live. Failures are logged and
    /// reported as `None`.
    pub async fn get_current_version(&self) -> Option<String> {
        match self.inner.runtime.current_bundle_id().await {
            Ok(bundle_id) => {
                log::info!(
                    "[UpdateManager] Current bundle: {}",
                    bundle_id.as_deref().unwrap_or("<embedded>")
                );
                self.update_state(|state| state.current_bundle_id = bundle_id.clone());
                bundle_id
            }
            Err(e) => {
                log::error!("[UpdateManager] Failed to read current bundle: {:#}", e);
                None
            }
        }
    }

    /// Compare the published bundle with the last applied one and download
    /// it when they differ.
    pub async fn check_for_updates(&self) -> UpdateCheckResult {
        if !self.inner.probe.is_connected().await {
            log::info!("[UpdateManager] No internet connection, skipping update check");
            return UpdateCheckResult::Offline;
        }

        let guard = match self.claim(Flight::Checking) {
            Ok(guard) => guard,
            Err(active) => {
                log::debug!(
                    "[UpdateManager] Update cycle busy ({}), skipping check",
                    active.bundle_url().unwrap_or("checking")
                );
                return UpdateCheckResult::InProgress;
            }
        };
        if self.state().is_restart_pending {
            log::debug!("[UpdateManager] Restart pending, skipping check");
            return UpdateCheckResult::InProgress;
        }

        self.update_state(|state| state.phase = UpdatePhase::Checking);
        log::info!("[UpdateManager] Checking for updates...");

        let remote = match self.inner.source.latest_bundle_url().await {
            Ok(remote) => remote,
            Err(e) => return self.fail_check(e),
        };
        let Some(bundle_url) = remote else {
            log::info!("[UpdateManager] No bundle published");
            self.finish_check_without_update();
            return UpdateCheckResult::NoUpdate;
        };

        let stored = match self.inner.ledger.last_applied().await {
            Ok(stored) => stored,
            Err(e) => return self.fail_check(e),
        };
        if !needs_update(stored.as_ref(), &bundle_url) {
            log::info!("[UpdateManager] Already on latest bundle: {}", bundle_url);
            self.finish_check_without_update();
            return UpdateCheckResult::NoUpdate;
        }

        log::info!(
            "[UpdateManager] Update available: {} -> {}",
            stored
                .as_ref()
                .map(|record| record.bundle_url.as_str())
                .unwrap_or("<none>"),
            bundle_url
        );
        self.update_state(|state| state.is_update_available = true);

        let outcome = self.start_checked(guard, &bundle_url).await;
        UpdateCheckResult::UpdateStarted { bundle_url, outcome }
    }

    /// Download and install `bundle_url`.
    ///
    /// Rejected while another check or download owns the cycle.
    pub async fn start_update(&self, bundle_url: &str) -> StartOutcome {
        let bundle_url = bundle_url.trim();
        if bundle_url.is_empty() {
            log::warn!("[UpdateManager] Ignoring update request with empty bundle URL");
            return StartOutcome::InvalidUrl;
        }

        if !self.inner.probe.is_connected().await {
            log::info!("[UpdateManager] No internet connection, skipping update");
            return StartOutcome::Offline;
        }

        let cancel = CancellationToken::new();
        let guard = match self.claim(Flight::downloading(bundle_url, cancel.clone())) {
            Ok(guard) => guard,
            Err(active) => {
                log::warn!(
                    "[UpdateManager] Update already in progress, ignoring request for {}",
                    bundle_url
                );
                return StartOutcome::AlreadyInFlight {
                    active_url: active.bundle_url().map(str::to_string),
                };
            }
        };
        if self.state().is_restart_pending {
            log::info!("[UpdateManager] Restart pending, ignoring request for {}", bundle_url);
            return StartOutcome::RestartPending;
        }

        self.run_download(guard, bundle_url.to_string(), cancel).await
    }

    /// Replay a download a previous run started but never finished.
    pub async fn apply_pending_update(&self) -> PendingUpdateResult {
        if !self.inner.probe.is_connected().await {
            log::info!("[UpdateManager] No internet connection, skipping pending update");
            return PendingUpdateResult::Offline;
        }

        let pending = match self.inner.ledger.pending().await {
            Ok(pending) => pending,
            Err(e) => {
                log::error!("[UpdateManager] Failed to read pending update: {:#}", e);
                return PendingUpdateResult::Failed(format!("{:#}", e));
            }
        };
        let Some(pending) = pending.filter(PendingUpdateRecord::is_actionable) else {
            log::debug!("[UpdateManager] No pending update");
            return PendingUpdateResult::NothingPending;
        };

        log::info!(
            "[UpdateManager] Applying pending update: {} (started {} ms ago)",
            pending.bundle_url,
            pending.age_millis()
        );
        PendingUpdateResult::Resumed(self.start_update(&pending.bundle_url).await)
    }

    /// Startup order: report the live bundle, finish any interrupted
    /// download, then look for something newer.
    pub async fn run_launch_sequence(&self) -> LaunchReport {
        let current_bundle_id = self.get_current_version().await;
        let pending = self.apply_pending_update().await;
        let check = self.check_for_updates().await;

        LaunchReport {
            current_bundle_id,
            pending,
            check,
        }
    }

    /// Stop the running download. Returns false when nothing was running.
    pub fn cancel_update(&self) -> bool {
        let cancelled = self.inner.flight.cancel();
        if cancelled {
            log::info!("[UpdateManager] Cancelling download");
        }
        cancelled
    }

    /// Schedule a relaunch after the settle delay. Repeated calls while one
    /// is scheduled do nothing.
    pub fn restart_app(&self) {
        if self.inner.restart_scheduled.swap(true, Ordering::SeqCst) {
            log::debug!("[UpdateManager] Restart already scheduled");
            return;
        }

        log::info!(
            "[UpdateManager] Restarting app in {:?}...",
            self.inner.settings.settle_delay
        );
        self.update_state(UpdateState::mark_restart_pending);

        let manager = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(manager.inner.settings.settle_delay).await;
            if let Err(e) = manager.inner.restart.restart().await {
                log::error!("[UpdateManager] Restart failed: {:#}", e);
                manager.update_state(UpdateState::clear_restart_pending);
                manager.inner.restart_scheduled.store(false, Ordering::SeqCst);
            }
        });
        *self.lock_restart_task() = Some(handle);
    }

    /// Wait for a scheduled relaunch to fire. Returns immediately when none
    /// is scheduled.
    pub async fn wait_for_restart(&self) {
        let handle = self.lock_restart_task().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::error!("[UpdateManager] Restart task failed: {}", e);
            }
        }
    }

    fn claim(&self, flight: Flight) -> Result<CycleGuard<'_>, Flight> {
        let flight = self.inner.flight.try_acquire(flight)?;
        Ok(CycleGuard {
            manager: self,
            flight,
        })
    }

    // Continue a check that found a new bundle; the guard already holds the slot.
    async fn start_checked(&self, guard: CycleGuard<'_>, bundle_url: &str) -> StartOutcome {
        if !self.inner.probe.is_connected().await {
            log::info!("[UpdateManager] Connection lost, skipping update");
            self.update_state(|state| state.phase = UpdatePhase::Idle);
            return StartOutcome::Offline;
        }

        let cancel = CancellationToken::new();
        guard.promote(Flight::downloading(bundle_url, cancel.clone()));
        self.run_download(guard, bundle_url.to_string(), cancel).await
    }

    async fn run_download(
        &self,
        _guard: CycleGuard<'_>,
        bundle_url: String,
        cancel: CancellationToken,
    ) -> StartOutcome {
        self.update_state(UpdateState::begin_download);
        log::info!("[UpdateManager] Downloading update from: {}", bundle_url);

        // The marker must be durable before any byte moves.
        if let Err(e) = self.inner.ledger.begin(&bundle_url).await {
            log::error!("[UpdateManager] Aborting update: {:#}", e);
            self.update_state(UpdateState::reset_to_idle);
            return StartOutcome::Aborted {
                bundle_url,
                message: format!("{:#}", e),
            };
        }

        let request = DownloadRequest {
            bundle_url: bundle_url.clone(),
            cache_key: Utc::now().timestamp_millis().to_string(),
            install_after_download: self.inner.settings.install_after_download,
        };
        let (initiated, outcome) = self.drive_transport(request, &cancel).await;

        self.update_state(|state| state.is_downloading = false);

        if let Err(e) = initiated {
            log::error!("[UpdateManager] Update error: {:#}", e);
            self.abandon_attempt().await;
            return StartOutcome::Aborted {
                bundle_url,
                message: format!("{:#}", e),
            };
        }

        let message = match outcome {
            TransferOutcome::Succeeded => return self.finish_install(bundle_url).await,
            TransferOutcome::Failed(_) if cancel.is_cancelled() => {
                log::info!("[UpdateManager] Download cancelled: {}", bundle_url);
                self.abandon_attempt().await;
                return StartOutcome::Cancelled { bundle_url };
            }
            TransferOutcome::Failed(message) => message,
            TransferOutcome::Stalled(limit) => {
                format!("Download stalled: no progress for {:?}", limit)
            }
            TransferOutcome::Unreported => {
                "Transport finished without reporting an outcome".to_string()
            }
        };

        log::error!("[UpdateManager] Update failed: {}", message);
        self.abandon_attempt().await;
        StartOutcome::DownloadFailed {
            bundle_url,
            message,
        }
    }

    // Run the transport and fold its event stream into state until it ends.
    async fn drive_transport(
        &self,
        request: DownloadRequest,
        cancel: &CancellationToken,
    ) -> (Result<()>, TransferOutcome) {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        // Fired when the transport outlives its outcome by a full stall period.
        let abandon = CancellationToken::new();
        let download = self
            .inner
            .transport
            .download(request, events_tx, cancel.clone());
        let transfer = async {
            tokio::select! {
                initiated = download => Some(initiated),
                _ = abandon.cancelled() => None,
            }
        };

        let watch = async {
            let mut outcome = TransferOutcome::Unreported;
            let mut settled = false;

            loop {
                let next = match self.inner.settings.stall_timeout {
                    Some(limit) => match tokio::time::timeout(limit, events_rx.recv()).await {
                        Ok(next) => next,
                        Err(_) if settled => {
                            log::warn!(
                                "[UpdateManager] Transport still running {:?} after its outcome, abandoning it",
                                limit
                            );
                            abandon.cancel();
                            break;
                        }
                        Err(_) => {
                            log::warn!("[UpdateManager] No progress for {:?}, cancelling", limit);
                            outcome = TransferOutcome::Stalled(limit);
                            settled = true;
                            cancel.cancel();
                            continue;
                        }
                    },
                    None => events_rx.recv().await,
                };
                let Some(event) = next else {
                    break;
                };

                if settled {
                    log::debug!("[UpdateManager] Ignoring {:?} after outcome", event);
                    continue;
                }
                match event {
                    TransportEvent::Progress { received, total } => {
                        self.update_state(|state| {
                            state.apply_progress(received, total);
                        });
                    }
                    TransportEvent::Succeeded => {
                        outcome = TransferOutcome::Succeeded;
                        settled = true;
                    }
                    TransportEvent::Failed { message } => {
                        outcome = TransferOutcome::Failed(message);
                        settled = true;
                    }
                }
            }
            outcome
        };

        let (initiated, outcome) = tokio::join!(transfer, watch);
        (initiated.unwrap_or(Ok(())), outcome)
    }

    async fn finish_install(&self, bundle_url: String) -> StartOutcome {
        self.update_state(|state| state.phase = UpdatePhase::Installing);
        log::info!("[UpdateManager] Update downloaded successfully: {}", bundle_url);

        // Leave the marker on failure so the next launch retries.
        if let Err(e) = self.inner.ledger.complete(&bundle_url).await {
            log::error!("[UpdateManager] Not restarting: {:#}", e);
            self.update_state(UpdateState::reset_to_idle);
            return StartOutcome::Aborted {
                bundle_url,
                message: format!("{:#}", e),
            };
        }

        self.get_current_version().await;
        self.restart_app();
        StartOutcome::Installed { bundle_url }
    }

    async fn abandon_attempt(&self) {
        if let Err(e) = self.inner.ledger.abandon().await {
            log::warn!("[UpdateManager] {:#}", e);
        }
        self.update_state(UpdateState::reset_to_idle);
    }

    fn fail_check(&self, error: anyhow::Error) -> UpdateCheckResult {
        log::error!("[UpdateManager] Failed to check for updates: {:#}", error);
        self.finish_check_without_update();
        UpdateCheckResult::Failed(format!("{:#}", error))
    }

    fn finish_check_without_update(&self) {
        self.update_state(|state| {
            state.is_update_available = false;
            state.phase = UpdatePhase::Idle;
        });
    }

    fn lock_state(&self) -> MutexGuard<'_, UpdateState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_restart_task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner
            .restart_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mutate the state and publish the result if anything changed. The
    /// lock is released before subscribers run.
    fn update_state<R>(&self, mutate: impl FnOnce(&mut UpdateState) -> R) -> R {
        let (result, event) = {
            let mut state = self.lock_state();
            let before = state.clone();
            let result = mutate(&mut state);
            let event = (*state != before).then(|| UpdateStateEvent {
                state: state.clone(),
                previous_phase: before.phase,
            });
            (result, event)
        };

        if let Some(event) = event {
            self.inner.bus.publish(event);
        }
        result
    }
}
