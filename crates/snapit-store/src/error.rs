/// Errors from capture store operations.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// A required value was absent at a copy or post call.
    #[error("cannot capture an absent {type_name} value")]
    NullInput { type_name: &'static str },

    /// The copy engine could not build a fresh instance of the target shape.
    #[error("cannot instantiate {type_name}: {reason}")]
    UninstantiableType {
        type_name: &'static str,
        reason: String,
    },

    /// A position lookup fell outside the readable range.
    #[error("position {position} is out of range (readable: {readable}, capacity: {capacity})")]
    IndexOutOfRange {
        position: usize,
        readable: usize,
        capacity: usize,
    },

    /// A predicate lookup matched no committed entry.
    #[error("no captured {type_name} matched the predicate")]
    NotFound { type_name: &'static str },

    /// An explicit-position commit targeted a slot that already holds an entry.
    #[error("position {position} already holds a capture")]
    PositionOccupied { position: usize },

    /// The operation was cancelled before it took effect.
    #[error("operation cancelled")]
    Cancelled,

    /// The ingest channel is closed.
    #[error("ingest queue is closed")]
    QueueClosed,

    /// A push to a buffer line after it was closed.
    #[error("buffer line is closed")]
    LineClosed,

    /// Serialization or deserialization failure in the field copier.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The store configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result alias for capture store operations.
pub type CaptureResult<T> = Result<T, CaptureError>;
