use std::time::Duration;

use crate::store::StoreError;

/// Errors surfaced by the account orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("account {0} not found")]
    NotFound(String),

    #[error("account {0} already exists")]
    AlreadyExists(String),

    #[error("account {0} is already logged in")]
    AlreadyLoggedIn(String),

    #[error("account {0} has no session, login first")]
    NotConnected(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("timed out after {0:?} waiting for pairing")]
    Timeout(Duration),

    #[error("operation cancelled")]
    Cancelled,

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("network: {0}")]
    Network(#[from] wamux_whatsapp::Error),

    #[error("storage: {0}")]
    Storage(#[source] StoreError),

    #[error("credential storage: {0}")]
    Credentials(String),

    #[error("qr render: {0}")]
    Render(String),
}

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller must change its input.
    Validation,
    /// The operation is not valid in the account's current state.
    StateConflict,
    Timeout,
    Cancelled,
    /// A collaborator (network, storage, filesystem) failed.
    External,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) | Self::AlreadyExists(_) | Self::InvalidInput(_) => {
                ErrorKind::Validation
            },
            Self::AlreadyLoggedIn(_) | Self::NotConnected(_) => ErrorKind::StateConflict,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Auth(_)
            | Self::Network(_)
            | Self::Storage(_)
            | Self::Credentials(_)
            | Self::Render(_) => ErrorKind::External,
        }
    }

    /// Whether the same call may succeed later without changing input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Timeout | ErrorKind::Cancelled | ErrorKind::External
        )
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            StoreError::Duplicate(id) => Self::AlreadyExists(id),
            other => Self::Storage(other),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
