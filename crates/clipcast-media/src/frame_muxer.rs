// crates/clipcast-media/src/frame_muxer.rs
//
// Reconciles one decoded video/audio stream pair against the channel's
// target format: resolves the display mode (simple / duplicate / half /
// interlace / deinterlace / deinterlace_bob / deinterlace_bob_reinterlace),
// rotates the audio cadence, and hands `FrameMaker` fully muxed output
// units. Ground truth for every piece of logic here is
// `modules/ffmpeg/producer2/muxer/frame_muxer_2.cpp` — this is a
// line-for-line port of its sub-stream bookkeeping, not a reinterpretation.

use std::collections::VecDeque;

use clipcast_core::format::{get_display_mode, DisplayMode, FieldMode};
use clipcast_core::types::{AudioChunk, DecodeOutcome, OutputFrame, RawPicture};
use clipcast_core::VideoFormatDesc;

use crate::pixel_convert;

/// Sub-stream overflow guard. The original raises an exception past 32
/// queued video frames / `32 * cadence` audio samples — a sign the source's
/// declared frame rate doesn't match its actual content.
const SUBSTREAM_OVERFLOW_FRAMES: usize = 32;

pub struct FrameMuxer {
    video_streams: VecDeque<VecDeque<RawPicture>>,
    audio_streams: VecDeque<Vec<i32>>,
    frame_buffer: VecDeque<OutputFrame>,

    display_mode: DisplayMode,
    in_fps: f64,
    target: VideoFormatDesc,
    audio_cadence: Vec<u32>,

    auto_transcode: bool,
    auto_deinterlace: bool,
    force_deinterlacing: bool,
    /// Human-readable filter string tracked for `FrameMaker::print()` /
    /// `::info()` diagnostics. YADIF tokens are appended here when a
    /// deinterlace display mode is chosen, matching the original's filter
    /// string construction; no libavfilter graph is actually driven by it —
    /// deinterlacing itself happens structurally (bob/pairing in `poll()`),
    /// not through a filter chain (see DESIGN.md).
    filter_str: String,
}

impl FrameMuxer {
    pub fn new(in_fps: f64, target: VideoFormatDesc, filter_str: String) -> Self {
        let mut audio_cadence = target.audio_cadence();
        // One-step-backward rotation at construction: fills the audio
        // mixer most optimally for 1001-denominator (NTSC) rates. This is
        // the single most failure-prone line in the whole engine — get the
        // direction wrong and every cadence slot after the first tick is
        // off-by-one relative to the real pattern.
        audio_cadence.rotate_right(1);

        Self {
            video_streams: VecDeque::from([VecDeque::new()]),
            audio_streams: VecDeque::from([Vec::new()]),
            frame_buffer: VecDeque::new(),
            display_mode: DisplayMode::Invalid,
            in_fps,
            target,
            audio_cadence,
            auto_transcode: true,
            auto_deinterlace: true,
            force_deinterlacing: false,
            filter_str,
        }
    }

    pub fn push_video(&mut self, outcome: DecodeOutcome<RawPicture>, deinterlace_hint: bool) {
        match outcome {
            DecodeOutcome::Flush => self.video_streams.push_back(VecDeque::new()),
            DecodeOutcome::Empty => {
                self.video_streams.back_mut().unwrap().push_back(RawPicture::empty());
                self.display_mode = DisplayMode::Simple;
            }
            DecodeOutcome::Frame(pic) => {
                if self.auto_deinterlace && self.force_deinterlacing != deinterlace_hint {
                    self.force_deinterlacing = deinterlace_hint;
                    self.display_mode = DisplayMode::Invalid;
                }
                if self.display_mode == DisplayMode::Invalid {
                    self.update_display_mode(pic.field_mode, pic.height, self.force_deinterlacing);
                }
                self.video_streams.back_mut().unwrap().push_back(pic);
            }
        }

        if self.video_streams.back().unwrap().len() > SUBSTREAM_OVERFLOW_FRAMES {
            log::warn!(
                target: "clipcast_media::frame_muxer",
                "video-stream overflow — likely incorrect frame-rate metadata"
            );
        }
    }

    pub fn push_audio(&mut self, outcome: DecodeOutcome<AudioChunk>) {
        match outcome {
            DecodeOutcome::Flush => self.audio_streams.push_back(Vec::new()),
            DecodeOutcome::Empty => {
                let n = self.audio_cadence[0] as usize * self.target.audio_channels as usize;
                self.audio_streams.back_mut().unwrap().extend(std::iter::repeat(0i32).take(n));
            }
            DecodeOutcome::Frame(chunk) => {
                self.audio_streams.back_mut().unwrap().extend(chunk.samples);
            }
        }

        let cadence = self.audio_cadence[0] as usize * self.target.audio_channels as usize;
        if self.audio_streams.back().unwrap().len() > SUBSTREAM_OVERFLOW_FRAMES * cadence.max(1) {
            log::warn!(
                target: "clipcast_media::frame_muxer",
                "audio-stream overflow — likely incorrect frame-rate metadata"
            );
        }
    }

    fn video_ready2(&self) -> bool {
        let need = match self.display_mode {
            DisplayMode::DeinterlaceBobReinterlace | DisplayMode::Interlace | DisplayMode::Half => 2,
            _ => 1,
        };
        self.video_streams.front().map(|q| q.len() >= need).unwrap_or(false)
    }

    fn audio_ready2(&self) -> bool {
        let cadence = self.audio_cadence[0] as usize * self.target.audio_channels as usize;
        let need = match self.display_mode {
            DisplayMode::Duplicate => cadence * 2,
            _ => cadence,
        };
        self.audio_streams.front().map(|b| b.len() >= need).unwrap_or(false)
    }

    pub fn video_ready(&self) -> bool {
        self.video_streams.len() > 1
            || (self.video_streams.len() >= self.audio_streams.len() && self.video_ready2())
    }

    pub fn audio_ready(&self) -> bool {
        self.audio_streams.len() > 1
            || (self.audio_streams.len() >= self.video_streams.len() && self.audio_ready2())
    }

    /// Drain one fully muxed output unit, resolving the current display
    /// mode's frame-expansion rule (duplicate/interlace/half) as needed.
    /// Recurses once after a sub-stream truncation so a dropped incomplete
    /// tail doesn't stall the very next call.
    pub fn poll(&mut self) -> Option<OutputFrame> {
        if let Some(frame) = self.frame_buffer.pop_front() {
            return Some(frame);
        }

        if self.video_streams.len() > 1
            && self.audio_streams.len() > 1
            && (!self.video_ready2() || !self.audio_ready2())
        {
            let dropped_v = self.video_streams.front().map(|q| q.len()).unwrap_or(0);
            let dropped_a = self.audio_streams.front().map(|b| b.len()).unwrap_or(0);
            if dropped_v > 0 || dropped_a > 0 {
                log::trace!(
                    target: "clipcast_media::frame_muxer",
                    "truncating: {dropped_v} video frames, {dropped_a} audio samples"
                );
            }
            self.video_streams.pop_front();
            self.audio_streams.pop_front();
        }

        if !self.video_ready2() || !self.audio_ready2() || self.display_mode == DisplayMode::Invalid {
            return None;
        }

        let video = self.pop_video();
        let audio = self.pop_audio();

        match self.display_mode {
            DisplayMode::Simple | DisplayMode::DeinterlaceBob | DisplayMode::Deinterlace => {
                self.frame_buffer.push_back(OutputFrame::Frame { video, audio });
            }
            DisplayMode::Interlace | DisplayMode::DeinterlaceBobReinterlace => {
                let video2 = self.pop_video();
                self.frame_buffer.push_back(OutputFrame::Frame { video: interlace_pair(video, video2, self.target.field_mode), audio });
            }
            DisplayMode::Duplicate => {
                let audio2 = self.pop_audio();
                self.frame_buffer.push_back(OutputFrame::Frame { video: video.clone(), audio });
                self.frame_buffer.push_back(OutputFrame::Frame { video, audio: audio2 });
            }
            DisplayMode::Half => {
                self.pop_video(); // Second field discarded.
                self.frame_buffer.push_back(OutputFrame::Frame { video, audio });
            }
            DisplayMode::Invalid => unreachable!("checked above"),
        }

        if self.frame_buffer.is_empty() { None } else { self.poll() }
    }

    fn pop_video(&mut self) -> RawPicture {
        self.video_streams.front_mut().unwrap().pop_front().expect("video_ready2 checked")
    }

    /// Pop `audio_cadence[0]` frames of samples from the front sub-stream
    /// and rotate the cadence one slot forward for next time.
    fn pop_audio(&mut self) -> AudioChunk {
        let n_frames = self.audio_cadence[0] as usize;
        let channels = self.target.audio_channels;
        let n_samples = n_frames * channels as usize;

        let buf = self.audio_streams.front_mut().unwrap();
        let samples: Vec<i32> = buf.drain(..n_samples).collect();

        self.audio_cadence.rotate_left(1);

        AudioChunk { channels, sample_rate: self.target.audio_sample_rate, samples, pts: 0 }
    }

    fn update_display_mode(&mut self, in_mode: FieldMode, frame_height: u32, force_deinterlace: bool) {
        self.display_mode = DisplayMode::Simple;
        if !self.auto_transcode {
            return;
        }

        let mut mode = in_mode;
        let mut fps = self.in_fps;

        if filter_is_deinterlacing(&self.filter_str) {
            mode = FieldMode::Progressive;
        }
        if filter_is_double_rate(&self.filter_str) {
            fps *= 2.0;
        }

        self.display_mode = get_display_mode(mode, fps, self.target.field_mode, self.target.fps());

        // NTSC DV exception: never deinterlace a 480-line source landing in
        // a 486-line NTSC target even though the heights differ.
        let is_ntsc_dv = frame_height == 480 && self.target.height == 486;
        if !is_ntsc_dv
            && self.display_mode == DisplayMode::Simple
            && mode != FieldMode::Progressive
            && self.target.field_mode != FieldMode::Progressive
            && frame_height != self.target.height
        {
            self.display_mode = DisplayMode::DeinterlaceBobReinterlace;
        }

        if force_deinterlace
            && mode != FieldMode::Progressive
            && !matches!(
                self.display_mode,
                DisplayMode::Deinterlace | DisplayMode::DeinterlaceBob | DisplayMode::DeinterlaceBobReinterlace
            )
        {
            log::info!(
                target: "clipcast_media::frame_muxer",
                "automatically started non-bob deinterlacing; consider FILTER DEINTERLACE_BOB for smoother playback"
            );
            self.display_mode = DisplayMode::Deinterlace;
        }

        match self.display_mode {
            DisplayMode::Deinterlace => self.filter_str = append_filter(&self.filter_str, "YADIF=0:-1"),
            DisplayMode::DeinterlaceBob | DisplayMode::DeinterlaceBobReinterlace => {
                self.filter_str = append_filter(&self.filter_str, "YADIF=1:-1")
            }
            _ => {}
        }

        if self.display_mode == DisplayMode::Invalid {
            log::warn!(target: "clipcast_media::frame_muxer", "auto-transcode: failed to detect display mode");
            self.display_mode = DisplayMode::Simple;
        }
    }

    /// Scale a source-reported total frame count into the count the target
    /// display mode will actually emit (interlace/half halve it, duplicate
    /// doubles it).
    pub fn calc_nb_frames(&self, nb_frames: u32) -> u32 {
        let n = nb_frames as u64;
        let n = match self.display_mode {
            DisplayMode::DeinterlaceBobReinterlace | DisplayMode::Interlace | DisplayMode::Half => n / 2,
            DisplayMode::Duplicate => n * 2,
            _ => n,
        };
        n as u32
    }
}

impl RawPicture {
    /// Placeholder video frame pushed to pair an audio-only tick against a
    /// muted or absent video stream, so the muxer's two sub-stream queues
    /// stay the same length. Never reaches `pixel_convert` — `poll()`
    /// resolves display mode to `Simple` the moment one of these is seen.
    pub fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            pixel_format: clipcast_core::pixel::BGRA,
            data: Vec::new(),
            field_mode: FieldMode::Progressive,
            pts: 0,
        }
    }
}

/// Weave two source frames into one interlaced picture: even rows (per
/// plane, at that plane's own subsampled resolution) come from `upper`,
/// odd rows from `lower`. `OutputFrame` is the final product this crate
/// hands off — there is no downstream weave stage — so both fields must
/// land in the one picture or half the source is silently lost.
fn interlace_pair(upper: RawPicture, lower: RawPicture, target_field_mode: FieldMode) -> RawPicture {
    let desc = upper.pixel_format;
    let (w, h) = (upper.width, upper.height);
    let mut data = vec![0u8; desc.packed_len(w, h)];

    for plane in 0..desc.planes {
        let (hs, vs) = desc.subsampling[plane];
        let plane_w = (w / hs).max(1) as usize;
        let plane_h = (h / vs).max(1) as usize;
        let row_bytes = plane_w * desc.bytes_per_sample;
        let offset = desc.plane_offset(plane, w, h);

        for row in 0..plane_h {
            let field = if row % 2 == 0 { &upper.data } else { &lower.data };
            let s = offset + row * row_bytes;
            if s + row_bytes <= field.len() {
                data[s..s + row_bytes].copy_from_slice(&field[s..s + row_bytes]);
            }
        }
    }

    RawPicture { width: w, height: h, pixel_format: desc, data, field_mode: target_field_mode, pts: upper.pts }
}

fn filter_is_deinterlacing(filter_str: &str) -> bool {
    filter_str.to_ascii_uppercase().contains("YADIF")
}

fn filter_is_double_rate(filter_str: &str) -> bool {
    filter_str.to_ascii_uppercase().contains("YADIF=1")
}

fn append_filter(existing: &str, token: &str) -> String {
    if existing.is_empty() {
        token.to_string()
    } else if existing.to_ascii_uppercase().contains(&token.to_ascii_uppercase()) {
        existing.to_string()
    } else {
        format!("{existing},{token}")
    }
}

/// Used only by `FrameMaker` to build a muxer's scaler-pool conversion step
/// after `poll()` returns a frame in the source's native pixel format.
pub fn finalize_for_target(
    frame: OutputFrame,
    target_fmt: ffmpeg_the_third::format::Pixel,
    target_w: u32,
    target_h: u32,
) -> OutputFrame {
    match frame {
        OutputFrame::Frame { video, audio } if video.width > 0 && video.height > 0 => {
            match pixel_convert::convert_to_target(&video, target_fmt, target_w, target_h) {
                Ok(converted) => OutputFrame::Frame { video: converted, audio },
                Err(e) => {
                    log::error!(target: "clipcast_media::frame_muxer", "target conversion failed: {e}");
                    OutputFrame::Frame { video, audio }
                }
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target_progressive_25() -> VideoFormatDesc {
        VideoFormatDesc {
            name: "test",
            width: 1920,
            height: 1080,
            fps_num: 25,
            fps_den: 1,
            field_mode: FieldMode::Progressive,
            audio_sample_rate: 48000,
            audio_channels: 2,
        }
    }

    fn picture(pts: i64) -> RawPicture {
        RawPicture {
            width: 2,
            height: 2,
            pixel_format: clipcast_core::pixel::YUV420P,
            data: vec![0u8; clipcast_core::pixel::YUV420P.packed_len(2, 2)],
            field_mode: FieldMode::Progressive,
            pts,
        }
    }

    fn chunk(n: usize) -> AudioChunk {
        AudioChunk { channels: 2, sample_rate: 48000, samples: vec![1i32; n * 2], pts: 0 }
    }

    #[test]
    fn cadence_starts_rotated_backward() {
        let muxer = FrameMuxer::new(25.0, target_progressive_25(), String::new());
        // 48000Hz/25fps is an exact 1920-sample cadence — rotation is a
        // no-op on a single-element cadence, but confirms it doesn't panic
        // on the boundary case.
        assert_eq!(muxer.audio_cadence, vec![1920]);
    }

    #[test]
    fn ntsc_cadence_rotation_direction() {
        let mut target = target_progressive_25();
        target.fps_num = 30000;
        target.fps_den = 1001;
        let muxer = FrameMuxer::new(29.97, target, String::new());
        // Un-rotated cadence is [1601,1602,1601,1602,1602]; rotate_right(1)
        // brings the last element (1602) to the front.
        assert_eq!(muxer.audio_cadence, vec![1602, 1601, 1602, 1601, 1602]);
    }

    #[test]
    fn simple_mode_emits_one_frame_per_tick() {
        let mut muxer = FrameMuxer::new(25.0, target_progressive_25(), String::new());
        muxer.push_video(DecodeOutcome::Frame(picture(0)), false);
        muxer.push_audio(DecodeOutcome::Frame(chunk(1920)));
        assert!(muxer.video_ready());
        assert!(muxer.audio_ready());
        let out = muxer.poll();
        assert!(matches!(out, Some(OutputFrame::Frame { .. })));
        assert!(muxer.poll().is_none());
    }

    #[test]
    fn not_ready_until_cadence_satisfied() {
        let mut muxer = FrameMuxer::new(25.0, target_progressive_25(), String::new());
        muxer.push_video(DecodeOutcome::Frame(picture(0)), false);
        muxer.push_audio(DecodeOutcome::Frame(chunk(100)));
        assert!(!muxer.audio_ready());
        assert!(muxer.poll().is_none());
    }

    #[test]
    fn duplicate_mode_emits_two_frames() {
        let mut muxer = FrameMuxer::new(50.0, target_progressive_25(), String::new());
        muxer.display_mode = DisplayMode::Duplicate;
        muxer.push_audio(DecodeOutcome::Frame(chunk(1920 * 2)));
        muxer.video_streams.back_mut().unwrap().push_back(picture(0));
        let first = muxer.poll();
        assert!(matches!(first, Some(OutputFrame::Frame { .. })));
        let second = muxer.poll();
        assert!(matches!(second, Some(OutputFrame::Frame { .. })));
        assert!(muxer.poll().is_none());
    }

    #[test]
    fn truncates_incomplete_leading_substream_on_flush_boundary() {
        let mut muxer = FrameMuxer::new(25.0, target_progressive_25(), String::new());
        // First sub-stream: one stray video frame, no audio — never ready.
        muxer.push_video(DecodeOutcome::Frame(picture(0)), false);
        // Flush boundary opens a second sub-stream on both sides.
        muxer.push_video(DecodeOutcome::Flush, false);
        muxer.push_audio(DecodeOutcome::Flush);
        // Second sub-stream is complete.
        muxer.push_video(DecodeOutcome::Frame(picture(1)), false);
        muxer.push_audio(DecodeOutcome::Frame(chunk(1920)));

        let out = muxer.poll();
        assert!(matches!(out, Some(OutputFrame::Frame { .. })));
        assert_eq!(muxer.video_streams.len(), 1);
    }

    #[test]
    fn interlace_pair_weaves_alternating_rows_not_just_the_first_field() {
        let desc = clipcast_core::pixel::BGRA;
        let (w, h) = (1, 4);
        let upper = RawPicture {
            width: w, height: h, pixel_format: desc,
            data: vec![1u8; desc.packed_len(w, h)],
            field_mode: FieldMode::Upper, pts: 0,
        };
        let lower = RawPicture {
            width: w, height: h, pixel_format: desc,
            data: vec![2u8; desc.packed_len(w, h)],
            field_mode: FieldMode::Lower, pts: 1,
        };

        let woven = interlace_pair(upper, lower, FieldMode::Upper);
        let row_bytes = desc.bytes_per_sample;
        assert_eq!(woven.data[0 * row_bytes], 1);
        assert_eq!(woven.data[1 * row_bytes], 2);
        assert_eq!(woven.data[2 * row_bytes], 1);
        assert_eq!(woven.data[3 * row_bytes], 2);
    }
}
