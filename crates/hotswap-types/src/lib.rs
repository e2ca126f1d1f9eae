//! Shared types for the hotswap update orchestrator.
//!
//! Durable records, the in-memory update state, and the transport event
//! vocabulary used between the manager and its collaborators.

pub mod records;
pub mod state;
pub mod transport;

pub use records::{
    LAST_UPDATED_BUNDLE_KEY, PendingUpdateRecord, UPDATE_PENDING_KEY, UpdateRecord,
};
pub use state::{UpdatePhase, UpdateState};
pub use transport::{DownloadRequest, TransportEvent};
