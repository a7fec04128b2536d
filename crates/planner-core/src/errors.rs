//! Error types for task mutations.

/// Input rejected locally before the row store is contacted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Title was empty or whitespace only.
    #[error("title is required")]
    BlankTitle,

    /// Progress outside `0..=100`.
    #[error("progress must be between 0 and 100, got {0}")]
    ProgressOutOfRange(i64),

    /// Negative (or absurdly large) effort estimate.
    #[error("estimate blocks must be a non-negative number, got {0}")]
    EstimateOutOfRange(i64),
}

/// Errors surfaced by the mutation coordinator.
///
/// Operating on a task that is no longer in the local collection is not an
/// error; those calls resolve to `Ok(None)` / `Ok(false)`.
#[derive(Debug, thiserror::Error)]
pub enum MutationError {
    /// The change failed local validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Connectivity reported offline; nothing was sent.
    #[error("offline: changes cannot be saved until the connection returns")]
    Offline,

    /// No signed-in user to scope the change to.
    #[error("no active session; sign in first")]
    NoSession,

    /// The row store rejected the call.
    #[error("remote store rejected {op}: {message}")]
    Remote {
        /// Store operation that failed.
        op: &'static str,
        /// Rendered error chain from the store.
        message: String,
    },
}

impl MutationError {
    pub(crate) fn remote(op: &'static str, err: &anyhow::Error) -> Self {
        Self::Remote {
            op,
            message: format!("{err:#}"),
        }
    }
}
