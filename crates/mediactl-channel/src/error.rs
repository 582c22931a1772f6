use std::fmt;

/// Error kind reported by the engine when it rejects a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// `TypeError`: the request carried malformed arguments.
    Type,
    /// `InvalidStateError`: the target entity cannot serve the request now.
    InvalidState,
    /// `UnsupportedError`: the engine does not support what was asked.
    Unsupported,
    /// Any other tag; only the reason is meaningful.
    Generic,
}

impl RejectionKind {
    /// Decode the `error` tag of a rejected response.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "TypeError" => Self::Type,
            "InvalidStateError" => Self::InvalidState,
            "UnsupportedError" => Self::Unsupported,
            _ => Self::Generic,
        }
    }
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Type => "TypeError",
            Self::InvalidState => "InvalidStateError",
            Self::Unsupported => "UnsupportedError",
            Self::Generic => "Error",
        };
        f.write_str(name)
    }
}

/// Errors that can occur on an engine channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The channel was closed before or while the request was pending.
    #[error("Channel closed")]
    Closed,

    /// The encoded request does not fit in a frame.
    #[error("Channel request too big ({size} bytes, max {max})")]
    RequestTooLarge { size: usize, max: usize },

    /// The engine answered with `{error, reason}`.
    #[error("{kind}: {reason}")]
    Rejected { kind: RejectionKind, reason: String },

    /// The engine answered with neither `accepted` nor `error`.
    #[error("response for request {0} is neither accepted nor rejected")]
    NoResponse(u32),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] mediactl_frame::FrameError),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
