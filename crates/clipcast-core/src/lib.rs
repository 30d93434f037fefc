// crates/clipcast-core/src/lib.rs
//
// Domain types for the clip producer engine: the video format table,
// pixel-format plane descriptors, the data shapes passed between
// components, and the shared error enum. No FFmpeg dependency — the
// FFmpeg-backed pipeline lives in `clipcast-media`.

pub mod error;
pub mod format;
pub mod pixel;
pub mod types;

pub use error::{ProducerError, Result};
pub use format::{get_display_mode, DisplayMode, FieldMode, VideoFormatDesc, FORMATS};
pub use pixel::PixelFormatDesc;
pub use types::{AudioChunk, DecodeOutcome, OutputFrame, ProducerParams, RawPicture, ResourceKind};
