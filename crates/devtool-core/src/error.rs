//! Error types for event decoding.

use thiserror::Error;

/// Failure to turn a wire payload into a [`crate::NetworkEvent`].
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload is not valid JSON or does not match the event schema.
    #[error("malformed event: {0}")]
    Json(#[from] serde_json::Error),

    /// The `type` discriminator was present but empty.
    #[error("event type is empty")]
    EmptyType,
}
