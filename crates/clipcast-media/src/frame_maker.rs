// crates/clipcast-media/src/frame_maker.rs
//
// The producer's worker thread: owns `Input`, the two decoders and the
// `FrameMuxer`, and drives them continuously into a bounded output queue
// that the caller polls from a different thread. Grounded in
// `modules/ffmpeg/producer2/frame_maker_2.cpp`'s `implementation` class —
// `tick()`/`decode_packet()`/`poll()`/`info()`/`print()` below are its
// direct counterparts — combined with the donor's dedicated-thread +
// latest-wins command slot pattern from `worker.rs`.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use clipcast_core::error::{ProducerError, Result};
use clipcast_core::format::VideoFormatDesc;
use clipcast_core::types::{DecodeOutcome, OutputFrame, ProducerParams, StreamTag};

use crate::audio_decoder::AudioDecoder;
use crate::frame_muxer::{self, FrameMuxer};
use crate::input::Input;
use crate::video_decoder::VideoDecoder;

/// Soft throttle: once this many units are queued, the worker stops
/// decoding for a tick rather than racing ahead of a slow consumer.
const TICK_PAUSE_THRESHOLD: usize = 10;
const MIN_BUFFER_COUNT: usize = 50;
const MAX_BUFFER_COUNT: usize = 100;
const MAX_BUFFER_SIZE: usize = 64_000_000;

#[derive(Debug, Clone, Copy)]
enum Command {
    Loop(bool),
    Seek(u32),
}

#[derive(Debug, Clone, Default)]
pub struct FrameMakerInfo {
    pub width: u32,
    pub height: u32,
    pub progressive: bool,
    pub fps: f64,
    pub loop_enabled: bool,
    pub frame_number: u32,
    pub file_nb_frames: u32,
}

struct SharedState {
    info: Mutex<FrameMakerInfo>,
    queued_bytes: AtomicU32,
    running: AtomicBool,
}

pub struct FrameMaker {
    out_rx: Receiver<OutputFrame>,
    cmd_tx: Sender<Command>,
    shared: Arc<SharedState>,
    shutdown: Arc<AtomicBool>,
    last_frame: Mutex<OutputFrame>,
}

impl FrameMaker {
    pub fn new(params: ProducerParams, target: VideoFormatDesc) -> Result<Self> {
        let loop_enabled = params.loop_producer;
        let start = params.start;

        let input = Input::open(params.clone())?;
        let video_decoder = input
            .video_stream_index()
            .map(|idx| VideoDecoder::open(&input_stream(&input, idx)?))
            .transpose()?;
        let audio_decoder = input
            .audio_stream_index()
            .map(|idx| {
                AudioDecoder::open(&input_stream(&input, idx)?, target.audio_sample_rate, target.audio_channels)
            })
            .transpose()?;

        if video_decoder.is_none() && audio_decoder.is_none() {
            return Err(ProducerError::StreamNotFound {
                path: std::path::PathBuf::from(&params.resource),
                kind: "video or audio",
            });
        }

        let fps = input.fps();
        let muxer = FrameMuxer::new(fps, target.clone(), params.filter.clone());

        let file_nb_frames = video_decoder.as_ref().map(|d| d.nb_frames()).unwrap_or(input.nb_frames_hint());

        let shared = Arc::new(SharedState {
            info: Mutex::new(FrameMakerInfo {
                width: target.width,
                height: target.height,
                progressive: video_decoder.as_ref().map(|d| d.is_progressive()).unwrap_or(true),
                fps,
                loop_enabled,
                frame_number: 0,
                file_nb_frames,
            }),
            queued_bytes: AtomicU32::new(0),
            running: AtomicBool::new(true),
        });

        let (out_tx, out_rx) = bounded::<OutputFrame>(MAX_BUFFER_COUNT);
        let (cmd_tx, cmd_rx) = bounded::<Command>(8);
        let shutdown = Arc::new(AtomicBool::new(false));

        if start > 0 {
            let _ = cmd_tx.send(Command::Seek(start));
        }

        let worker_shared = Arc::clone(&shared);
        let worker_shutdown = Arc::clone(&shutdown);
        // The mixer's native pixel format is always BGRA; FrameMuxer::poll()
        // hands back frames in their source format, and this is the final
        // conversion step before a unit reaches the output queue.
        let target_fmt = ffmpeg_the_third::format::Pixel::BGRA;
        let (tw, th) = (target.width, target.height);

        thread::Builder::new()
            .name("clipcast-frame-maker".into())
            .spawn(move || {
                run_worker(
                    input,
                    video_decoder,
                    audio_decoder,
                    muxer,
                    loop_enabled,
                    start,
                    out_tx,
                    cmd_rx,
                    worker_shared,
                    worker_shutdown,
                    target_fmt,
                    tw,
                    th,
                )
            })
            .expect("failed to spawn frame-maker thread");

        Ok(Self {
            out_rx,
            cmd_tx,
            shared,
            shutdown,
            last_frame: Mutex::new(OutputFrame::Eof),
        })
    }

    /// Non-blocking poll. Returns the next queued unit, or repeats the last
    /// one delivered when the queue is momentarily empty — the producer
    /// side absorbs underflow rather than surfacing a gap to the mixer.
    pub fn receive(&self) -> OutputFrame {
        match self.out_rx.try_recv() {
            Ok(frame) => {
                let size = frame_byte_size(&frame) as u32;
                self.shared.queued_bytes.fetch_sub(size.min(self.shared.queued_bytes.load(Ordering::Relaxed)), Ordering::Relaxed);
                *self.last_frame.lock().unwrap() = frame.clone();
                frame
            }
            Err(_) => self.last_frame.lock().unwrap().clone(),
        }
    }

    pub fn last_frame(&self) -> OutputFrame {
        self.last_frame.lock().unwrap().clone()
    }

    pub fn nb_frames(&self) -> u32 {
        self.shared.info.lock().unwrap().file_nb_frames
    }

    pub fn is_eof(&self) -> bool {
        !self.shared.running.load(Ordering::Relaxed)
    }

    pub fn info(&self) -> FrameMakerInfo {
        self.shared.info.lock().unwrap().clone()
    }

    pub fn print(&self) -> String {
        let info = self.info();
        let mode = if info.progressive { 'p' } else { 'i' };
        let fps = if info.progressive { info.fps } else { info.fps * 2.0 };
        format!("{}x{}{}{:.2}", info.width, info.height, mode, fps)
    }

    /// Parse and forward an AMCP-style command: `LOOP`, `LOOP 0`/`LOOP 1`,
    /// or `SEEK <frame>`.
    pub fn call(&self, command: &str) -> Result<()> {
        let mut tokens = command.split_whitespace();
        let verb = tokens.next().unwrap_or("").to_ascii_uppercase();

        match verb.as_str() {
            "LOOP" => {
                let enabled = match tokens.next() {
                    Some(arg) => arg != "0",
                    None => true,
                };
                self.cmd_tx
                    .send(Command::Loop(enabled))
                    .map_err(|_| ProducerError::InvalidArgument { detail: "frame maker shut down".into() })
            }
            "SEEK" => {
                let target: u32 = tokens
                    .next()
                    .ok_or_else(|| ProducerError::InvalidArgument { detail: "SEEK requires a frame number".into() })?
                    .parse()
                    .map_err(|_| ProducerError::InvalidArgument { detail: "SEEK frame number must be an integer".into() })?;
                self.cmd_tx
                    .send(Command::Seek(target))
                    .map_err(|_| ProducerError::InvalidArgument { detail: "frame maker shut down".into() })
            }
            other => Err(ProducerError::InvalidArgument { detail: format!("unknown command: {other}") }),
        }
    }
}

impl Drop for FrameMaker {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

fn input_stream<'a>(input: &'a Input, idx: usize) -> Result<ffmpeg_the_third::format::stream::Stream<'a>> {
    input
        .stream(idx)
        .ok_or_else(|| ProducerError::StreamNotFound { path: std::path::PathBuf::new(), kind: "indexed stream" })
}

#[allow(clippy::too_many_arguments)]
fn run_worker(
    mut input: Input,
    mut video_decoder: Option<VideoDecoder>,
    mut audio_decoder: Option<AudioDecoder>,
    mut muxer: FrameMuxer,
    mut loop_enabled: bool,
    start: u32,
    out_tx: Sender<OutputFrame>,
    cmd_rx: Receiver<Command>,
    shared: Arc<SharedState>,
    shutdown: Arc<AtomicBool>,
    target_fmt: ffmpeg_the_third::format::Pixel,
    target_w: u32,
    target_h: u32,
) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        match cmd_rx.recv_timeout(Duration::from_millis(2)) {
            Ok(Command::Loop(enabled)) => {
                loop_enabled = enabled;
                shared.info.lock().unwrap().loop_enabled = enabled;
            }
            Ok(Command::Seek(target)) => {
                if let Err(e) = input.seek(target) {
                    log::warn!(target: "clipcast_media::frame_maker", "seek to {target} failed: {e}");
                } else {
                    // Flush both decoders and open a fresh sub-stream on
                    // both sides of the muxer so frames from before the
                    // seek never mix with frames from after it.
                    if let Some(vd) = video_decoder.as_mut() {
                        let _ = vd.decode(None);
                    }
                    if let Some(ad) = audio_decoder.as_mut() {
                        let _ = ad.decode(None);
                    }
                    muxer.push_video(DecodeOutcome::Flush, false);
                    muxer.push_audio(DecodeOutcome::Flush);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let queued = out_tx.len();
        let queued_bytes = shared.queued_bytes.load(Ordering::Relaxed) as usize;
        if queued >= TICK_PAUSE_THRESHOLD
            || (queue_is_full(queued, queued_bytes) && queued > MIN_BUFFER_COUNT)
        {
            continue;
        }

        if input.eof() {
            shared.info.lock().unwrap().frame_number = 0;
            if loop_enabled {
                if let Err(e) = input.seek(start) {
                    log::warn!(target: "clipcast_media::frame_maker", "loop seek failed: {e}");
                }
                continue;
            } else {
                shared.running.store(false, Ordering::Relaxed);
                break;
            }
        }

        match decode_one(&mut input, &mut video_decoder, &mut audio_decoder, &mut muxer) {
            Ok(()) => {}
            Err(e) => {
                log::error!(target: "clipcast_media::frame_maker", "decode error: {e}");
                shared.running.store(false, Ordering::Relaxed);
                break;
            }
        }

        {
            let file_frame_number = video_decoder.as_ref().map(|d| d.nb_frames()).unwrap_or(0);
            let mut info = shared.info.lock().unwrap();
            info.frame_number = info.frame_number.max(file_frame_number);
        }

        while let Some(frame) = muxer.poll() {
            let frame = frame_muxer::finalize_for_target(frame, target_fmt, target_w, target_h);
            let size = frame_byte_size(&frame);
            if out_tx.send(frame).is_err() {
                shutdown.store(true, Ordering::Relaxed);
                return;
            }
            shared.queued_bytes.fetch_add(size as u32, Ordering::Relaxed);
        }
    }
}

fn queue_is_full(count: usize, bytes: usize) -> bool {
    bytes > MAX_BUFFER_SIZE || count > MAX_BUFFER_COUNT
}

fn frame_byte_size(frame: &OutputFrame) -> usize {
    match frame {
        OutputFrame::Frame { video, audio } => video.data.len() + audio.samples.len() * 4,
        _ => 0,
    }
}

/// One packet's worth of decode work, dispatched to the matching decoder
/// and pushed into the muxer. Mirrors `decode_packet()`'s stream-index
/// dispatch, including the empty/flush sentinel pairing used when only one
/// of video/audio has a decoder.
fn decode_one(
    input: &mut Input,
    video_decoder: &mut Option<VideoDecoder>,
    audio_decoder: &mut Option<AudioDecoder>,
    muxer: &mut FrameMuxer,
) -> Result<()> {
    match input.read_packet() {
        Some((StreamTag::Video, packet)) => {
            if let Some(vd) = video_decoder.as_mut() {
                let outcome = vd.decode(Some(&packet))?;
                let is_flush = matches!(outcome, DecodeOutcome::Flush);
                let deinterlace_hint = !vd.is_progressive();
                muxer.push_video(outcome, deinterlace_hint);
                if audio_decoder.is_none() {
                    if is_flush {
                        muxer.push_audio(DecodeOutcome::Flush);
                    } else if !muxer.audio_ready() {
                        muxer.push_audio(DecodeOutcome::Empty);
                    }
                }
            }
        }
        Some((StreamTag::Audio, packet)) => {
            if let Some(ad) = audio_decoder.as_mut() {
                let first = ad.decode(Some(&packet))?;
                let is_flush = matches!(first, DecodeOutcome::Flush);
                muxer.push_audio(first);
                // One packet can hold several codec frames (PCM, high
                // packet-duration codecs) — drain everything already
                // buffered before moving to the next packet.
                while let Some(chunk) = ad.drain_ready()? {
                    muxer.push_audio(DecodeOutcome::Frame(chunk));
                }
                if video_decoder.is_none() {
                    if is_flush {
                        muxer.push_video(DecodeOutcome::Flush, false);
                    } else if !muxer.video_ready() {
                        muxer.push_video(DecodeOutcome::Empty, false);
                    }
                }
            }
        }
        None => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_full_requires_both_count_and_min_threshold() {
        assert!(!queue_is_full(10, 100));
        assert!(queue_is_full(MAX_BUFFER_COUNT + 1, 0));
        assert!(queue_is_full(0, MAX_BUFFER_SIZE + 1));
    }

    #[test]
    fn frame_byte_size_accounts_for_audio_and_video() {
        use clipcast_core::types::{AudioChunk, RawPicture};
        let frame = OutputFrame::Frame {
            video: RawPicture {
                width: 2,
                height: 2,
                pixel_format: clipcast_core::pixel::BGRA,
                data: vec![0u8; 16],
                field_mode: clipcast_core::format::FieldMode::Progressive,
                pts: 0,
            },
            audio: AudioChunk { channels: 2, sample_rate: 48000, samples: vec![0i32; 10], pts: 0 },
        };
        assert_eq!(frame_byte_size(&frame), 16 + 10 * 4);
    }
}
