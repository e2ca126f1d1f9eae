use std::fmt;

use serde::Serialize;

/// Where the update cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum UpdatePhase {
    #[default]
    Idle,
    Checking,
    Downloading,
    Installing,
    RestartPending,
}

impl fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UpdatePhase::Idle => "idle",
            UpdatePhase::Checking => "checking",
            UpdatePhase::Downloading => "downloading",
            UpdatePhase::Installing => "installing",
            UpdatePhase::RestartPending => "restart-pending",
        };
        f.write_str(label)
    }
}

/// In-memory update state, created fresh on every launch.
///
/// Owned by the update manager; everyone else only sees cloned snapshots.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct UpdateState {
    pub phase: UpdatePhase,
    /// Always within `0.0..=100.0`.
    pub progress_percent: f64,
    pub is_downloading: bool,
    pub is_restart_pending: bool,
    pub current_bundle_id: Option<String>,
    pub is_update_available: bool,
}

impl UpdateState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter `Downloading` with progress reset to zero.
    pub fn begin_download(&mut self) {
        self.phase = UpdatePhase::Downloading;
        self.is_downloading = true;
        self.progress_percent = 0.0;
    }

    /// Apply a transport progress tick.
    ///
    /// Unknown or non-positive totals leave progress untouched. Returns
    /// whether the percentage changed.
    pub fn apply_progress(&mut self, received: u64, total: Option<u64>) -> bool {
        let Some(total) = total.filter(|t| *t > 0) else {
            return false;
        };

        let percent = (received as f64 / total as f64 * 100.0).clamp(0.0, 100.0);
        if percent == self.progress_percent {
            return false;
        }
        self.progress_percent = percent;
        true
    }

    /// Back to `Idle` after a failed or abandoned attempt.
    pub fn reset_to_idle(&mut self) {
        self.phase = UpdatePhase::Idle;
        self.is_downloading = false;
    }

    /// A check, download, or install is underway.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self.phase,
            UpdatePhase::Checking | UpdatePhase::Downloading | UpdatePhase::Installing
        )
    }

    /// Clean up after an attempt that stopped without reaching an outcome.
    /// `Idle` and `RestartPending` are left as they are.
    pub fn settle_interrupted(&mut self) {
        if self.is_in_flight() {
            self.phase = UpdatePhase::Idle;
        }
        self.is_downloading = false;
    }

    pub fn mark_restart_pending(&mut self) {
        self.phase = UpdatePhase::RestartPending;
        self.is_restart_pending = true;
    }

    pub fn clear_restart_pending(&mut self) {
        self.phase = UpdatePhase::Idle;
        self.is_restart_pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_idle() {
        let state = UpdateState::new();
        assert_eq!(state.phase, UpdatePhase::Idle);
        assert_eq!(state.progress_percent, 0.0);
        assert!(!state.is_downloading);
        assert!(!state.is_restart_pending);
        assert!(state.current_bundle_id.is_none());
        assert!(!state.is_update_available);
    }

    #[test]
    fn test_progress_is_monotonic_for_increasing_bytes() {
        let mut state = UpdateState::new();
        state.begin_download();

        let mut seen = Vec::new();
        for received in [0u64, 100, 250, 600, 999, 1000] {
            state.apply_progress(received, Some(1000));
            seen.push(state.progress_percent);
        }

        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{:?}", seen);
        assert_eq!(*seen.last().unwrap(), 100.0);
    }

    #[test]
    fn test_progress_ignores_zero_or_unknown_total() {
        let mut state = UpdateState::new();
        state.begin_download();
        state.apply_progress(40, Some(100));

        assert!(!state.apply_progress(50, Some(0)));
        assert!(!state.apply_progress(50, None));
        assert_eq!(state.progress_percent, 40.0);
    }

    #[test]
    fn test_progress_is_clamped_when_transport_over_reports() {
        let mut state = UpdateState::new();
        state.apply_progress(1500, Some(1000));
        assert_eq!(state.progress_percent, 100.0);
    }

    #[test]
    fn test_settle_interrupted_keeps_restart_pending() {
        let mut state = UpdateState::new();
        state.begin_download();
        state.apply_progress(30, Some(100));
        state.settle_interrupted();
        assert_eq!(state.phase, UpdatePhase::Idle);
        assert!(!state.is_downloading);
        assert_eq!(state.progress_percent, 30.0);

        state.mark_restart_pending();
        state.settle_interrupted();
        assert_eq!(state.phase, UpdatePhase::RestartPending);
        assert!(state.is_restart_pending);
    }

    #[test]
    fn test_begin_download_resets_progress() {
        let mut state = UpdateState::new();
        state.apply_progress(10, Some(20));
        state.begin_download();

        assert_eq!(state.progress_percent, 0.0);
        assert!(state.is_downloading);
        assert_eq!(state.phase, UpdatePhase::Downloading);
    }

    #[test]
    fn test_restart_pending_round_trip() {
        let mut state = UpdateState::new();
        state.mark_restart_pending();
        assert_eq!(state.phase, UpdatePhase::RestartPending);
        assert!(state.is_restart_pending);

        state.clear_restart_pending();
        assert_eq!(state.phase, UpdatePhase::Idle);
        assert!(!state.is_restart_pending);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(UpdatePhase::RestartPending.to_string(), "restart-pending");
        assert_eq!(UpdatePhase::Downloading.to_string(), "downloading");
    }
}
