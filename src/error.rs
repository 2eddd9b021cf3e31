use crate::protocol::mapping::Vendor;

/// Error type shared by every stream decoder.
///
/// `MalformedEvent`, `UnknownAccumulatorKey` and `TruncatedStream` are
/// recovered inside the decoders; the remaining kinds end the sequence.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("Malformed {vendor} event: {detail}")]
    MalformedEvent { vendor: Vendor, detail: String },
    #[error("Unknown accumulator key: {0}")]
    UnknownAccumulatorKey(String),
    #[error("{vendor} reported error: code={code}, message={message}")]
    VendorReported {
        vendor: Vendor,
        code: String,
        message: String,
    },
    #[error("{vendor} stream ended mid-accumulation")]
    TruncatedStream { vendor: Vendor },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Stream cancelled")]
    Cancelled,
}

impl StreamError {
    pub(crate) fn malformed(vendor: Vendor, detail: impl Into<String>) -> Self {
        StreamError::MalformedEvent {
            vendor,
            detail: detail.into(),
        }
    }

    /// Whether the decoders recover from this error locally instead of
    /// failing the whole sequence.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            StreamError::MalformedEvent { .. }
            | StreamError::UnknownAccumulatorKey(_)
            | StreamError::TruncatedStream { .. } => true,
            StreamError::VendorReported { .. }
            | StreamError::Transport(_)
            | StreamError::Cancelled => false,
        }
    }
}
