// 🚦 Directory Errors - every failure is scoped to one operation
//
// Nothing here is fatal to the process. The caller (CLI, API, UI) decides
// how to display each variant.

use crate::entities::Identity;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Accounts read failed - the whole directory build fails
    #[error("accounts source unavailable: {0}")]
    SourceUnavailable(String),

    /// Records read failed - the build degrades to account-only entries
    #[error("records source unavailable, showing accounts only: {0}")]
    SourcePartiallyUnavailable(String),

    #[error("{0} has no login account; this change needs an account-backed entry")]
    UnsupportedForRecordOnly(Identity),

    /// Write to the accounts source failed; message is surfaced verbatim
    #[error("{0}")]
    PersistenceFailed(String),

    #[error("no directory entry for {0}")]
    EntryNotFound(Identity),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("access denied for user {0}")]
    AccessDenied(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl DirectoryError {
    /// True for errors caused by the caller's input (not worth retrying)
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            DirectoryError::UnsupportedForRecordOnly(_)
                | DirectoryError::EntryNotFound(_)
                | DirectoryError::InvalidStatus(_)
                | DirectoryError::InvalidIdentity(_)
                | DirectoryError::AccessDenied(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DirectoryError>;
