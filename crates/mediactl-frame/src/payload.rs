//! Payload classification for frames received on the control channel.
//!
//! The first byte of every payload tells what it carries: `{` opens a JSON
//! message, a tag byte marks a text log line emitted by the engine.

/// First byte of a JSON message.
pub const JSON_START: u8 = b'{';

/// Debug log line.
pub const LOG_DEBUG: u8 = b'D';

/// Warning log line.
pub const LOG_WARN: u8 = b'W';

/// Error log line.
pub const LOG_ERROR: u8 = b'E';

/// Dump output (printed as-is by the engine).
pub const LOG_DUMP: u8 = b'X';

/// Severity of a log line written by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTag {
    Debug,
    Warn,
    Error,
    Dump,
}

impl LogTag {
    /// Map a tag byte to its severity.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            LOG_DEBUG => Some(Self::Debug),
            LOG_WARN => Some(Self::Warn),
            LOG_ERROR => Some(Self::Error),
            LOG_DUMP => Some(Self::Dump),
            _ => None,
        }
    }
}

/// What a control-channel payload carries.
#[derive(Debug, PartialEq, Eq)]
pub enum PayloadKind<'a> {
    /// A JSON response or notification.
    Json(&'a [u8]),
    /// A log line with its tag byte stripped.
    Log { tag: LogTag, text: &'a [u8] },
    /// Anything else, keyed by its first byte.
    Unexpected(Option<u8>),
}

/// Classify a control-channel payload by its first byte.
pub fn classify(payload: &[u8]) -> PayloadKind<'_> {
    match payload.first().copied() {
        Some(JSON_START) => PayloadKind::Json(payload),
        Some(byte) => match LogTag::from_byte(byte) {
            Some(tag) => PayloadKind::Log {
                tag,
                text: &payload[1..],
            },
            None => PayloadKind::Unexpected(Some(byte)),
        },
        None => PayloadKind::Unexpected(None),
    }
}

/// Re-emit an engine log line through `tracing`.
pub fn emit_engine_log(tag: LogTag, text: &[u8], pid: Option<u32>) {
    let line = String::from_utf8_lossy(text);
    match tag {
        LogTag::Debug => tracing::debug!(target: "mediactl::engine", ?pid, "{line}"),
        LogTag::Warn => tracing::warn!(target: "mediactl::engine", ?pid, "{line}"),
        LogTag::Error => tracing::error!(target: "mediactl::engine", ?pid, "{line}"),
        LogTag::Dump => tracing::info!(target: "mediactl::engine", ?pid, "{line}"),
    }
}
