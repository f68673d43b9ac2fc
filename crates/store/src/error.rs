use feed_model::ChannelId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The channel-filtered item set is empty. Distinct from a missing
    /// pivot, which yields a valid but empty page.
    #[error("channel {0} has no items")]
    EmptyChannel(ChannelId),
}
