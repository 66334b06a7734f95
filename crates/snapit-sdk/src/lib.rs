//! Entry point for SnapIt.
//!
//! [`Snapshot`] is the single object callers talk to: it keeps one capture
//! store, ingest queue, and buffer line per value type and dispatches on the type
//! argument of each call. [`Snap`] is a lighter, registry-free history for
//! a single value.

pub mod error;
pub mod registry;
pub mod snap;
pub mod snapshot;

pub use error::{SdkError, SdkResult};
pub use registry::{Capturable, Captures, Registry};
pub use snap::{Snap, SnapValue};
pub use snapshot::Snapshot;

// Re-export key store types
pub use snapit_store::{
    BufferLine, CancellationToken, CaptureError, CaptureStore, CaptureView, Copier, CopyEngine,
    IngestQueue, QueueState, StoreConfig,
};
