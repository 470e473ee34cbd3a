use thiserror::Error;

/// Error taxonomy for the sync engine. Every per-message error is local to
/// the offending session; callers decide who sees it and whether the
/// connection survives.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("authentication error: {0}")]
    Auth(String),

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("patch failed: {0} of {1} hunks applied")]
    PatchFailed(usize, usize),

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("peer outbound queue full, disconnecting session {0}")]
    SlowPeer(String),
}

impl SyncError {
    /// Whether this error kind is ever broadcast, or always local to the
    /// sender. All per-message errors stay local.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Auth(_) => "auth_error",
            SyncError::NotFound(_) => "not_found",
            SyncError::Forbidden(_) => "forbidden",
            SyncError::PatchFailed(_, _) => "patch_failed",
            SyncError::Persistence(_) => "persistence_failure",
            SyncError::SlowPeer(_) => "slow_peer",
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
