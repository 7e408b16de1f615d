//! The Slave's synchronization state, exactly the four values the
//! protocol's data model names.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    Stopped,
    Syncing,
    Synchronized,
    Error,
}

impl Default for SyncStatus {
    fn default() -> Self {
        SyncStatus::Stopped
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncStatus::Stopped => "STOPPED",
            SyncStatus::Syncing => "SYNCING",
            SyncStatus::Synchronized => "SYNCHRONIZED",
            SyncStatus::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}
