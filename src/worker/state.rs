//! Worker lifecycle states

use serde::{Deserialize, Serialize};

/// Lifecycle state of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkerState {
    /// Created, no lifecycle event has run
    Parsed,
    /// Install event in progress
    Installing,
    /// Precache complete, waiting to activate
    Installed,
    /// Activate event in progress
    Activating,
    /// Stale buckets evicted, clients claimed
    Activated,
    /// A lifecycle event failed
    Redundant,
}

impl WorkerState {
    /// Only an activated worker intercepts fetches
    pub fn can_intercept_fetch(&self) -> bool {
        matches!(self, WorkerState::Activated)
    }

    /// A lifecycle event is running
    pub fn is_busy(&self) -> bool {
        matches!(self, WorkerState::Installing | WorkerState::Activating)
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerState::Parsed => write!(f, "parsed"),
            WorkerState::Installing => write!(f, "installing"),
            WorkerState::Installed => write!(f, "installed"),
            WorkerState::Activating => write!(f, "activating"),
            WorkerState::Activated => write!(f, "activated"),
            WorkerState::Redundant => write!(f, "redundant"),
        }
    }
}
