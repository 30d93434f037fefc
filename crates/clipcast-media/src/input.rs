// crates/clipcast-media/src/input.rs
//
// Resource opening, stream selection, fps reconciliation and frame-based
// seeking. The only component that knows about resource *kind* — decoders
// downstream just see packets tagged by stream index.

use std::path::PathBuf;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::context::Input as AvInput;
use ffmpeg::media::Type;
use ffmpeg::util::dictionary::Owned as Dictionary;

use clipcast_core::error::{ProducerError, Result};
use clipcast_core::format::{is_sane_fps, snap_to_known_format};
use clipcast_core::types::{ProducerParams, ResourceKind, StreamTag};

/// VP6 family codecs need a byte-offset seek instead of a frame seek when
/// the target is the very start of the file — their keyframe index is
/// sometimes missing or unreliable at position 0. Deliberately *not*
/// extended to any other seek target.
fn needs_byte_seek_at_zero(codec_id: ffmpeg::codec::Id) -> bool {
    matches!(
        codec_id,
        ffmpeg::codec::Id::VP6 | ffmpeg::codec::Id::VP6A | ffmpeg::codec::Id::VP6F
    )
}

pub struct Input {
    pub params: ProducerParams,
    ictx: AvInput,
    video_stream_index: Option<usize>,
    audio_stream_index: Option<usize>,
    pub video_codec_id: Option<ffmpeg::codec::Id>,
    pub fps_num: u32,
    pub fps_den: u32,
    frame_number: u32,
    eof: bool,
}

impl Input {
    pub fn open(params: ProducerParams) -> Result<Self> {
        let path = PathBuf::from(&params.resource);

        let ictx = match params.kind {
            ResourceKind::File | ResourceKind::Stream => {
                ffmpeg::format::input(&path).map_err(|e| ProducerError::ResourceError {
                    path: path.clone(),
                    reason: e.to_string(),
                })?
            }
            ResourceKind::Device => {
                // Capture devices need format + option hints the demuxer
                // can't infer from the resource string alone (resolution,
                // pixel format, framerate). Callers encode these as
                // `key=value` pairs appended to `resource` after a `?`.
                let mut dict = Dictionary::new();
                if let Some((_, opts)) = params.resource.split_once('?') {
                    for kv in opts.split('&') {
                        if let Some((k, v)) = kv.split_once('=') {
                            dict.set(k, v);
                        }
                    }
                }
                ffmpeg::format::input_with_dictionary(&path, dict).map_err(|e| {
                    ProducerError::ResourceError { path: path.clone(), reason: e.to_string() }
                })?
            }
        };

        let video_stream_index = ictx.streams().best(Type::Video).map(|s| s.index());
        let audio_stream_index = ictx.streams().best(Type::Audio).map(|s| s.index());

        if video_stream_index.is_none() && audio_stream_index.is_none() {
            return Err(ProducerError::StreamNotFound { path, kind: "video or audio" });
        }

        let video_codec_id = video_stream_index
            .and_then(|idx| ictx.stream(idx))
            .map(|s| s.parameters().id());

        let (fps_num, fps_den) = video_stream_index
            .and_then(|idx| ictx.stream(idx))
            .map(|s| read_fps(&ictx, &path, &s, audio_stream_index.and_then(|idx| ictx.stream(idx))))
            .unwrap_or((25, 1));

        Ok(Self {
            params,
            ictx,
            video_stream_index,
            audio_stream_index,
            video_codec_id,
            fps_num,
            fps_den,
            frame_number: 0,
            eof: false,
        })
    }

    pub fn video_stream_index(&self) -> Option<usize> {
        self.video_stream_index
    }

    pub fn audio_stream_index(&self) -> Option<usize> {
        self.audio_stream_index
    }

    /// Borrow a stream by index to construct a decoder against. `None` if
    /// the index is out of range for this container.
    pub fn stream(&self, idx: usize) -> Option<ffmpeg::format::stream::Stream<'_>> {
        self.ictx.stream(idx)
    }

    pub fn fps(&self) -> f64 {
        self.fps_num as f64 / self.fps_den as f64
    }

    /// Best-effort total frame count hint. `VideoDecoder` refines this once
    /// decoding is underway (some containers under-report `nb_frames`).
    pub fn nb_frames_hint(&self) -> u32 {
        self.video_stream_index
            .and_then(|idx| self.ictx.stream(idx))
            .map(|s| s.frames() as u32)
            .unwrap_or(0)
    }

    /// Read the next packet, tagged by which logical stream it belongs to.
    /// Returns `None` at EOF (sets the internal eof flag so `eof()` reports
    /// correctly even before the caller observes a second `None`).
    pub fn read_packet(&mut self) -> Option<(StreamTag, ffmpeg::Packet)> {
        if self.eof {
            return None;
        }
        match self.ictx.packets().next() {
            Some((stream, packet)) => {
                let idx = stream.index();
                let tag = if Some(idx) == self.video_stream_index {
                    StreamTag::Video
                } else if Some(idx) == self.audio_stream_index {
                    StreamTag::Audio
                } else {
                    return self.read_packet();
                };
                if tag == StreamTag::Video {
                    self.frame_number += 1;
                }
                Some((tag, packet))
            }
            None => {
                self.eof = true;
                None
            }
        }
    }

    pub fn eof(&self) -> bool {
        self.eof
            || matches!(self.params.length, Some(len) if self.frame_number >= self.params.start + len)
    }

    /// Seek to `target` frame, using the source's own frame rate to convert
    /// to a timestamp. VP6-family codecs use a byte-offset seek when
    /// `target == 0` (see `needs_byte_seek_at_zero`); every other case
    /// uses a standard frame-accurate timestamp seek.
    pub fn seek(&mut self, target: u32) -> Result<()> {
        let stream_index = self.video_stream_index.ok_or_else(|| ProducerError::StreamNotFound {
            path: PathBuf::from(&self.params.resource),
            kind: "video",
        })?;

        let use_byte_seek = target == 0
            && self.video_codec_id.map(needs_byte_seek_at_zero).unwrap_or(false);

        if use_byte_seek {
            // Seek to the very first byte of the stream — safe because
            // target == 0 means "start of file", not an arbitrary position.
            self.ictx
                .seek(0, ..)
                .map_err(|e| ProducerError::ResourceError {
                    path: PathBuf::from(&self.params.resource),
                    reason: format!("byte seek to start failed: {e}"),
                })?;
        } else {
            let tb = self
                .ictx
                .stream(stream_index)
                .map(|s| s.time_base())
                .unwrap_or((1, 25).into());
            let fixed_target = (target as i64 * tb.denominator() as i64 * self.fps_den as i64)
                / (tb.numerator() as i64 * self.fps_num as i64).max(1);
            self.ictx
                .seek(fixed_target, ..fixed_target)
                .map_err(|e| ProducerError::ResourceError {
                    path: PathBuf::from(&self.params.resource),
                    reason: format!("seek to frame {target} failed: {e}"),
                })?;
        }

        self.frame_number = target;
        self.eof = false;
        Ok(())
    }

    pub fn frame_number(&self) -> u32 {
        self.frame_number
    }
}

/// Probe a stream's fps, correcting for containers that misreport
/// `ticks_per_frame` or collapse the time base to an implausible value.
/// Mirrors the donor's probing style (`probe.rs`'s best-stream selection)
/// generalized from "pick a stream" to "pick a stream and sanity-check its
/// declared rate".
///
/// `.flv` sources are checked first against their own metadata framerate —
/// more reliable than the declared stream time base for that container.
/// If the stream time base (after `fix_time_base`) still isn't sane, falls
/// back to deriving fps from the audio stream's duration against the video
/// stream's own frame-count hint.
pub fn read_fps<'a>(
    ictx: &AvInput,
    path: &std::path::Path,
    stream: &ffmpeg::format::stream::Stream<'a>,
    audio_stream: Option<ffmpeg::format::stream::Stream<'a>>,
) -> (u32, u32) {
    if is_flv_path(path) {
        if let Some(fps) = read_flv_fps(ictx).filter(|&f| is_sane_fps(f)) {
            return fps_to_fraction(fps);
        }
    }

    let tb = stream.time_base();

    // `ticks_per_frame` only lives on the decoder's AVCodecContext, not on
    // the stream's bare AVCodecParameters — some legacy MPEG-1/2 streams set
    // it to 2 (one tick per *field*). Opening a throwaway decoder just to
    // read this one field is cheap relative to the cost of decoding wrong.
    let ticks_per_frame = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
        .ok()
        .and_then(|ctx| ctx.decoder().video().ok())
        .map(|dec| unsafe { (*dec.as_ptr()).ticks_per_frame.max(1) as i64 })
        .unwrap_or(1);

    let (mut num, mut den) = (tb.numerator() as i64, tb.denominator() as i64 * ticks_per_frame);
    (num, den) = fix_time_base(num, den);

    let fps = den as f64 / num.max(1) as f64;
    if is_sane_fps(fps) {
        if let Some(known) = snap_to_known_format(fps) {
            return (known.fps_num, known.fps_den);
        }
        return (den as u32, num as u32);
    }

    // Last resort: derive fps from the audio stream's duration against the
    // video stream's own frame-count hint.
    if let Some(audio) = audio_stream {
        if let Some(derived) = fps_from_audio_duration(&audio, stream.frames() as u32).filter(|&f| is_sane_fps(f)) {
            return fps_to_fraction(derived);
        }
    }

    // Fall back to a sane default rather than propagating a clearly bogus
    // rate into the muxer's display-mode resolution.
    (25, 1)
}

fn is_flv_path(path: &std::path::Path) -> bool {
    path.extension().map(|e| e.eq_ignore_ascii_case("flv")).unwrap_or(false)
}

/// `.flv` containers sometimes carry an `onMetaData` framerate more
/// reliable than the declared stream time base; the demuxer surfaces it as
/// format-level metadata when present.
fn read_flv_fps(ictx: &AvInput) -> Option<f64> {
    ictx.metadata().get("framerate").and_then(|s| s.parse::<f64>().ok())
}

/// Divide the video stream's own frame-count hint by the audio stream's
/// duration in seconds. Only meaningful when both are present and the
/// audio stream actually reports a sample rate and duration.
fn fps_from_audio_duration(audio_stream: &ffmpeg::format::stream::Stream, video_nb_frames: u32) -> Option<f64> {
    if video_nb_frames == 0 {
        return None;
    }
    let sample_rate = ffmpeg::codec::context::Context::from_parameters(audio_stream.parameters())
        .ok()
        .and_then(|ctx| ctx.decoder().audio().ok())
        .map(|dec| dec.rate())
        .unwrap_or(0);
    if sample_rate == 0 {
        return None;
    }
    let duration_sec = audio_stream.duration() as f64 / sample_rate as f64;
    if duration_sec <= 0.0 {
        return None;
    }
    Some(video_nb_frames as f64 / duration_sec)
}

fn fps_to_fraction(fps: f64) -> (u32, u32) {
    if let Some(known) = snap_to_known_format(fps) {
        return (known.fps_num, known.fps_den);
    }
    (((fps * 1000.0).round().max(1.0)) as u32, 1000)
}

/// Correct a `(num, den)` time-base pair that collapsed to something
/// unusable — e.g. `num == 1` after a container rounds away the fractional
/// part. Mirrors the original `fix_time_base` escalation: first try
/// rebuilding `num` from the order of magnitude of `den`, then fall back to
/// halving `den` until the ratio is plausible again.
fn fix_time_base(num: i64, den: i64) -> (i64, i64) {
    if num == 1 {
        let magnitude = (den as f64).log10().floor() as i64 - 1;
        let fixed_num = 10_i64.pow(magnitude.max(0) as u32);
        return (fixed_num, den);
    }
    let mut den = den;
    let mut num = num;
    while den > 0 && !is_sane_fps(den as f64 / num.max(1) as f64) && den % 2 == 0 {
        den /= 2;
    }
    (num, den)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fix_time_base_rebuilds_collapsed_numerator() {
        // den = 30000 → magnitude = floor(log10(30000)) - 1 = 4 - 1 = 3 → num = 1000
        let (num, den) = fix_time_base(1, 30000);
        assert_eq!(num, 1000);
        assert_eq!(den, 30000);
    }

    #[test]
    fn needs_byte_seek_only_for_vp6_family() {
        assert!(needs_byte_seek_at_zero(ffmpeg::codec::Id::VP6));
        assert!(needs_byte_seek_at_zero(ffmpeg::codec::Id::VP6A));
        assert!(needs_byte_seek_at_zero(ffmpeg::codec::Id::VP6F));
        assert!(!needs_byte_seek_at_zero(ffmpeg::codec::Id::H264));
    }
}
