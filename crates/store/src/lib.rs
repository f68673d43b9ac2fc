//! # Feed Store
//!
//! Canonical raw-item storage for the channel feed.
//!
//! ```text
//! OrderedMap ──snapshots──> subscribers (watch, coalescing)
//!     ▲
//! RawItemRepository ──mutations──> broadcast push stream
//!     ▲
//! PushGenerator (owned simulated upstream)
//! ```

mod error;
mod generator;
mod ordered;
mod repository;

pub use error::{Result, StoreError};
pub use generator::{GeneratorConfig, PushGenerator};
pub use ordered::{KeyWatch, OrderedMap, Snapshot};
pub use repository::RawItemRepository;
