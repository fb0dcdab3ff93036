/// Outcome of a failed fetch, shared by every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError<E> {
    /// The fetch function reported an error.
    #[error("fetch failed: {0}")]
    Failed(E),

    /// The fetch task panicked or was cancelled by runtime shutdown.
    #[error("fetch task aborted before completing")]
    Aborted,
}

impl<E> FetchError<E> {
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Failed(err) => Some(err),
            Self::Aborted => None,
        }
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Failed(err) => Some(err),
            Self::Aborted => None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

/// Rejected store configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("shard amount must be a power of two greater than one, got {0}")]
    InvalidShardAmount(usize),
}
