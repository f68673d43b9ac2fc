use feed_model::SessionKey;
use feed_store::StoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Error, Debug)]
pub enum SessionError {
    /// The key was never attached, or has been detached.
    #[error("no session attached for key {0}")]
    NotFound(SessionKey),

    /// Repository errors propagate unmodified; the registry never retries.
    #[error(transparent)]
    Store(#[from] StoreError),
}
