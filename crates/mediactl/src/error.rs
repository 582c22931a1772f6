use mediactl_channel::{ChannelError, RejectionKind};
use mediactl_ortc::OrtcError;

/// Errors surfaced by workers, routers and their entities.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed arguments. Never worth retrying.
    #[error("{0}")]
    Validation(String),

    /// Negotiation found nothing compatible.
    #[error("{0}")]
    Unsupported(String),

    /// The entity or its channel is closed.
    #[error("{0}")]
    InvalidState(String),

    /// The engine rejected the request.
    #[error("{kind}: {reason}")]
    Engine { kind: RejectionKind, reason: String },

    /// Any other channel failure.
    #[error("channel error: {0}")]
    Channel(ChannelError),
}

impl Error {
    pub(crate) fn closed(entity: &str) -> Self {
        Self::InvalidState(format!("{entity} closed"))
    }
}

impl From<OrtcError> for Error {
    fn from(err: OrtcError) -> Self {
        match err {
            OrtcError::Validation(reason) => Self::Validation(reason),
            OrtcError::Unsupported(reason) => Self::Unsupported(reason),
        }
    }
}

impl From<ChannelError> for Error {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Closed => Self::InvalidState(err.to_string()),
            ChannelError::Rejected { kind, reason } => match kind {
                RejectionKind::Type => Self::Validation(reason),
                RejectionKind::InvalidState => Self::InvalidState(reason),
                RejectionKind::Unsupported => Self::Unsupported(reason),
                RejectionKind::Generic => Self::Engine { kind, reason },
            },
            other => Self::Channel(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
