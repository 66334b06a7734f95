use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("no capture store registered for {0}")]
    NotRegistered(&'static str),

    #[error("property not found: {0}")]
    PropertyNotFound(String),

    #[error("property {name} has an unexpected type: {reason}")]
    PropertyType { name: String, reason: String },

    #[error("capture error: {0}")]
    Capture(#[from] snapit_store::CaptureError),
}

pub type SdkResult<T> = Result<T, SdkError>;
