/// Errors raised by the WhatsApp client layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("sidecar connection: {0}")]
    Connection(String),

    #[error("sidecar connection closed")]
    Closed,

    #[error("sidecar request {0} timed out")]
    RequestTimeout(String),

    #[error("sidecar rejected request: {0}")]
    Rejected(String),

    #[error("malformed sidecar reply: {0}")]
    Protocol(String),

    #[error("client is not connected")]
    NotConnected,

    #[error("client is already connected")]
    AlreadyConnected,

    #[error("client is not logged in")]
    NotLoggedIn,

    #[error("device is already paired")]
    AlreadyPaired,

    #[error("invalid jid: {0}")]
    InvalidJid(String),

    #[error("device store is closed")]
    StoreClosed,

    #[error("device store: {0}")]
    Store(#[from] sled::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
