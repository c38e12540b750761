//! Resource lifecycle status

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle phase of a resource as seen by the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Status {
    /// No snapshot has been observed yet
    #[default]
    Unknown,
    Creating,
    Running,
    Updating,
    Deleting,
    Deleted,
    Disconnected,
    Error,
    Inconsistent,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Creating => "Creating",
            Self::Running => "Running",
            Self::Updating => "Updating",
            Self::Deleting => "Deleting",
            Self::Deleted => "Deleted",
            Self::Disconnected => "Disconnected",
            Self::Error => "Error",
            Self::Inconsistent => "Inconsistent",
        }
    }

    /// An operation is still in progress on the remote side
    pub fn is_transitional(&self) -> bool {
        matches!(self, Self::Creating | Self::Updating | Self::Deleting)
    }

    pub fn is_stable(&self) -> bool {
        !self.is_transitional()
    }

    /// Map a remote provisioning/lifecycle state string onto a status.
    ///
    /// Matching is case-insensitive; anything unrecognised is `Unknown`.
    pub fn from_provisioning_state(state: &str) -> Self {
        match state.trim().to_lowercase().as_str() {
            "succeeded" | "running" | "active" | "ready" | "online" | "ok" => Self::Running,
            "creating" | "provisioning" | "accepted" | "pending" | "starting" => Self::Creating,
            "updating" | "upgrading" | "scaling" | "migrating" | "restarting" => Self::Updating,
            "deleting" | "dropping" => Self::Deleting,
            "deleted" => Self::Deleted,
            "disconnected" | "stopped" | "offline" | "unavailable" => Self::Disconnected,
            "failed" | "error" | "canceled" | "cancelled" => Self::Error,
            "inconsistent" | "degraded" => Self::Inconsistent,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
