//! Offline support: queued actions, the last known catalog and reconnection.

mod action_log;
mod connectivity;
mod snapshot;
mod sync;

pub use action_log::{ActionLog, ActionType};
pub use connectivity::{ConnectivityMonitor, ConnectivityState, HttpProbe, Probe};
pub use snapshot::SnapshotStore;
pub use sync::{record_offline_action, SyncCoordinator, SyncSettings};
