/// Errors raised while validating or negotiating RTP/SCTP parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrtcError {
    /// Malformed input.
    #[error("{0}")]
    Validation(String),

    /// Nothing compatible was found.
    #[error("{0}")]
    Unsupported(String),
}

pub(crate) fn validation(message: impl Into<String>) -> OrtcError {
    OrtcError::Validation(message.into())
}

pub(crate) fn unsupported(message: impl Into<String>) -> OrtcError {
    OrtcError::Unsupported(message.into())
}

pub type Result<T> = std::result::Result<T, OrtcError>;
