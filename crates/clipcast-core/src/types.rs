// crates/clipcast-core/src/types.rs
//
// The shapes that flow between Input, the two decoders, FrameMuxer,
// FrameMaker and LayerTap. Everything here is plain data — no FFmpeg
// handles, no thread state.

use crate::format::FieldMode;
use crate::pixel::PixelFormatDesc;
use std::path::PathBuf;

/// What kind of resource a producer was opened against. Determines both how
/// `Input::open` resolves the resource string and how `nb_frames()` behaves
/// (DEVICE/STREAM are unbounded).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    File,
    Device,
    Stream,
}

/// Parsed producer configuration — the Rust side of an AMCP-style token
/// list (`<KIND> <resource> LOOP SEEK 100 LENGTH 500 FILTER DEINTERLACE_BOB`).
/// See `clipcast_media::params::parse` for the parser itself.
#[derive(Debug, Clone)]
pub struct ProducerParams {
    pub kind: ResourceKind,
    pub resource: String,
    pub loop_producer: bool,
    pub start: u32,
    pub length: Option<u32>,
    pub filter: String,
    pub force_deinterlace: bool,
}

impl Default for ProducerParams {
    fn default() -> Self {
        Self {
            kind: ResourceKind::File,
            resource: String::new(),
            loop_producer: false,
            start: 0,
            length: None,
            filter: String::new(),
            force_deinterlace: false,
        }
    }
}

/// Outcome of feeding one packet to a decoder. `Flush` and `Empty` are the
/// sentinel values `FrameMuxer` uses to keep its two sub-stream queues in
/// lockstep across seeks, EOF, and missing streams — they are not decode
/// errors.
#[derive(Debug)]
pub enum DecodeOutcome<T> {
    /// A real decoded unit.
    Frame(T),
    /// The decoder was flushed (seek or EOF boundary) — push a new
    /// sub-stream onto the muxer's queue for this stream.
    Flush,
    /// No decoder exists for this media kind (e.g. a video-only file feeding
    /// the audio side) — keep the muxer's sub-stream queues paired.
    Empty,
}

/// One decoded, not-yet-converted video frame.
#[derive(Debug, Clone)]
pub struct RawPicture {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormatDesc,
    /// Packed (stride-free) plane data, laid out per `pixel_format`.
    pub data: Vec<u8>,
    pub field_mode: FieldMode,
    pub pts: i64,
}

/// One decoded, resampled chunk of audio. Samples are interleaved 32-bit
/// signed ints at `channels` channels — the donor's encode pipeline targets
/// `AV_SAMPLE_FMT_S32` for exactly this reason (wide headroom for later
/// mixing without clipping).
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub channels: u16,
    pub sample_rate: u32,
    pub samples: Vec<i32>,
    pub pts: i64,
}

impl AudioChunk {
    pub fn sample_count(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    /// A chunk of `n` frames of digital silence, used to pair an empty audio
    /// sub-stream against a video-only tick.
    pub fn silence(channels: u16, sample_rate: u32, n: usize, pts: i64) -> Self {
        Self {
            channels,
            sample_rate,
            samples: vec![0i32; n * channels as usize],
            pts,
        }
    }
}

/// One fully muxed unit ready for an external mixer to consume.
#[derive(Debug, Clone)]
pub enum OutputFrame {
    Frame { video: RawPicture, audio: AudioChunk },
    /// Consumer polled faster than the producer could fill — not an error.
    Late,
    Eof,
}

/// A demuxed packet tagged with which logical stream (video/audio) it
/// belongs to. The packet payload itself is FFmpeg-owned and lives in
/// `clipcast-media` — this crate only needs to know the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamTag {
    Video,
    Audio,
}

/// Context carried by `ResourceError` / `StreamNotFound` — kept separate
/// from `error::ProducerError` so non-FFmpeg code can build error values
/// without importing the error enum's full variant list.
#[derive(Debug, Clone)]
pub struct ResourceRef {
    pub path: PathBuf,
    pub kind: ResourceKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_chunk_has_expected_sample_count() {
        let c = AudioChunk::silence(2, 48000, 1602, 0);
        assert_eq!(c.sample_count(), 1602);
        assert_eq!(c.samples.len(), 1602 * 2);
        assert!(c.samples.iter().all(|&s| s == 0));
    }

    #[test]
    fn default_params_are_file_kind_no_loop() {
        let p = ProducerParams::default();
        assert_eq!(p.kind, ResourceKind::File);
        assert!(!p.loop_producer);
        assert_eq!(p.start, 0);
        assert!(p.length.is_none());
    }
}
