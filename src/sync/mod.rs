//! Meeting cache reconciliation against the upstream scheduling service.

pub mod expiry;
pub mod reconciler;
pub mod source;
pub mod store;

pub use expiry::ExpiryScanner;
pub use reconciler::{Reconciler, SyncReport, SyncWindow};
#[cfg(test)]
pub use source::MockMeetingSource;
pub use source::{MeetingSource, SnapshotRecord};
pub use store::MeetingStore;
