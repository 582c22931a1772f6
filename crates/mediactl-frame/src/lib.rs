//! Length-prefixed framing for media engine channels.
//!
//! Every message exchanged with the engine is framed with a 4-byte
//! little-endian payload length. Payloads are capped at 4 MiB.
//!
//! No partial reads, no buffer management in user code.

pub mod codec;
pub mod error;
pub mod payload;

pub use codec::{
    decode_frame, encode_frame, FrameCodec, FrameConfig, HEADER_SIZE, MAX_FRAME, MAX_PAYLOAD,
};
pub use error::{FrameError, Result};
pub use payload::{classify, emit_engine_log, LogTag, PayloadKind};
