//! # Feed Overlay
//!
//! Per-item reactive attributes maintained independently of the raw item
//! stream. The reaction overlay merges a batched pull source with a live
//! push stream into one shared ordered map; the scrap overlay mirrors it
//! without a push channel. Both paths converge on ordered `put`/`delete`
//! calls against the same map, so the write applied later wins regardless
//! of origin.

mod error;
mod reaction;
mod scrap;
mod sources;

pub use error::{OverlayError, Result};
pub use reaction::ReactionOverlay;
pub use scrap::ScrapOverlay;
pub use sources::{
    ManualReactionPush, RandomReactionPush, RandomReactionPushConfig, ReactionPullSource,
    ScrapSource, SimulatedReactionPull, SimulatedScrapSource,
};
