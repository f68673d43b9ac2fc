//! # Feed Session
//!
//! Per-session composition of the feed pipeline.
//!
//! ```text
//! RawItemRepository ──push stream──> PageManager (windowed copy)
//!        │                               │ ordered snapshots
//!        └── fetch ──> PageManager       ▼
//!                               DerivedItemCache ──batched pull──> overlays
//!                                       │
//!                                       ▼
//!                               SessionRegistry output stream
//! ```

mod derived;
mod error;
mod page;
mod registry;

pub use derived::{DerivedItem, DerivedItemCache};
pub use error::{Result, SessionError};
pub use page::PageManager;
pub use registry::{DerivedSnapshot, SessionRegistry};
