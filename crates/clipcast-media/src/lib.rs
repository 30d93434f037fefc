// crates/clipcast-media/src/lib.rs
//
// FFmpeg-backed half of the clip producer: everything that touches
// `ffmpeg_the_third` directly. `clipcast-core` owns the pure domain
// types and math this crate builds on.

pub mod audio_decoder;
pub mod frame_maker;
pub mod frame_muxer;
pub mod input;
pub mod layer_tap;
pub mod params;
pub mod pixel_convert;
pub mod scaler_pool;
pub mod video_decoder;

pub use audio_decoder::AudioDecoder;
pub use frame_maker::{FrameMaker, FrameMakerInfo};
pub use frame_muxer::FrameMuxer;
pub use input::Input;
pub use layer_tap::LayerTap;
pub use video_decoder::VideoDecoder;

pub use clipcast_core::{
    get_display_mode, DisplayMode, FieldMode, OutputFrame, ProducerError, ProducerParams, Result,
    VideoFormatDesc, FORMATS,
};
