// crates/clipcast-core/src/error.rs
//
// Error surface shared by every producer component. Kept as one flat enum
// rather than one type per module — callers match on `ProducerError`
// regardless of which component raised it.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    /// The underlying resource (file, device, stream) could not be opened
    /// or stopped responding mid-stream.
    #[error("resource error opening {path}: {reason}")]
    ResourceError { path: PathBuf, reason: String },

    /// `Input` could not find a usable video or audio stream in the
    /// container, or a requested stream index does not exist.
    #[error("stream not found in {path} (wanted {kind})")]
    StreamNotFound { path: PathBuf, kind: &'static str },

    /// A decoder rejected a packet or frame it cannot recover from.
    /// Non-fatal decode hiccups are logged and skipped — this variant is
    /// only raised when the decoder itself is unusable going forward.
    #[error("decode error in {component} ({codec}): {reason}")]
    DecodeError {
        component: &'static str,
        codec: String,
        reason: String,
    },

    /// The output queue exceeded `MAX_BUFFER_COUNT` or `MAX_BUFFER_SIZE`
    /// without the consumer draining it.
    #[error("overflow: {detail}")]
    OverflowError { detail: String },

    /// A `call()` command or `ProducerParams` token could not be parsed.
    #[error("invalid argument: {detail}")]
    InvalidArgument { detail: String },
}

pub type Result<T> = std::result::Result<T, ProducerError>;
