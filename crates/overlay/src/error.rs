use thiserror::Error;

pub type Result<T> = std::result::Result<T, OverlayError>;

#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("pull source failure: {0}")]
    Pull(String),

    /// The push channel's consumer is gone.
    #[error("push channel closed")]
    Closed,
}
