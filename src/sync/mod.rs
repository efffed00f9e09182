//! Sync orchestration between the remote API and the local store.
//!
//! [`Synchronizer`] decides whether a refresh is due, fetches only records
//! that changed, reconciles them into the store and replays offline edits.

mod error;
mod orchestrator;
mod throttle;

pub use error::SyncError;
pub use orchestrator::{RefreshOutcome, SyncSettings, Synchronizer};
pub use throttle::{RefreshKey, RefreshTimes};
