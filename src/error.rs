//! Error types
//!
//! Errors surfaced by the resource core. Remote failures on list/get paths
//! never reach this type: they are logged and degraded to empty results at
//! the module boundary.

use thiserror::Error;

/// Errors returned by resource ids, drafts and deletes
#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed resource id '{id}': {reason}")]
    MalformedId { id: String, reason: String },

    #[error("Resource id '{0}' has no parent")]
    NoParent(String),

    #[error("Draft for '{0}' has already been committed")]
    AlreadyCommitted(String),

    #[error("Client for module '{0}' is not available")]
    ClientUnavailable(String),

    /// Rejection from the remote side, message passed through verbatim
    #[error(transparent)]
    Remote(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn malformed(id: &str, reason: impl Into<String>) -> Self {
        Self::MalformedId {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
