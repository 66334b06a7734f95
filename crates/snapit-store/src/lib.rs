//! Concurrent capture store for SnapIt.
//!
//! A capture is an isolated copy of a value, held at a stable position so
//! later code can look at a past value without being able to change it (or
//! be changed by it). This crate holds the per-type machinery; the
//! type-keyed registry and entry object live in `snapit-sdk`.
//!
//! # Components
//!
//! - [`CopyEngine`] -- isolation: `Clone`-based copies and by-name field
//!   projection
//! - [`CaptureStore`] -- growable, indexed buffer of captures for one type
//! - [`IngestQueue`] -- async hand-off that reserves positions up front and
//!   drains into a store
//! - [`CaptureView`] -- copy-out snapshot of a store's backing array
//! - [`BufferLine`] -- closable stream of values, outside the positioned
//!   store
//!
//! # Design Rules
//!
//! 1. Positions are assigned once and never reused by the same store.
//! 2. Growth doubles capacity and keeps every existing position.
//! 3. All writes to a backing array go through one mutex per store.
//! 4. Readers never hold the writer lock; a replaced array is never written.
//! 5. The queue only feeds the store. Reads are always answered by the store.

pub mod config;
pub mod copy;
pub mod error;
pub mod line;
pub mod queue;
pub mod store;
pub mod view;

// Re-export primary types at crate root for ergonomic imports.
pub use config::StoreConfig;
pub use copy::{Copier, CopyEngine};
pub use error::{CaptureError, CaptureResult};
pub use line::BufferLine;
pub use queue::{IngestQueue, QueueState};
pub use store::CaptureStore;
pub use view::CaptureView;
pub use tokio_util::sync::CancellationToken;
