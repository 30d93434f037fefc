// crates/clipcast-media/src/audio_decoder.rs
//
// Packet-driven audio decode with a lazily-created resampler. Grounded in
// the donor's in-process resampler usage (`encode.rs`'s
// `software::resampling::Context` construction via `get_or_insert_with`) —
// reused here for the decode side instead of the encode side.

use clipcast_core::error::{ProducerError, Result};
use clipcast_core::types::{AudioChunk, DecodeOutcome};

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::sample::{Sample, Type as SampleType};
use ffmpeg::format::stream::Stream;
use ffmpeg::software::resampling::context::Context as SwrContext;
use ffmpeg::util::channel_layout::ChannelLayout;
use ffmpeg::util::frame::audio::Audio as AvAudioFrame;

const TARGET_SAMPLE_FORMAT: Sample = Sample::I32(SampleType::Packed);

pub struct AudioDecoder {
    decoder: ffmpeg::decoder::audio::Audio,
    resampler: Option<SwrContext>,
    target_sample_rate: u32,
    target_channels: u16,
}

impl AudioDecoder {
    pub fn open(stream: &Stream, target_sample_rate: u32, target_channels: u16) -> Result<Self> {
        let ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| ProducerError::DecodeError {
                component: "audio_decoder",
                codec: format!("{:?}", stream.parameters().id()),
                reason: e.to_string(),
            })?;
        let decoder = ctx.decoder().audio().map_err(|e| ProducerError::DecodeError {
            component: "audio_decoder",
            codec: format!("{:?}", stream.parameters().id()),
            reason: e.to_string(),
        })?;

        Ok(Self { decoder, resampler: None, target_sample_rate, target_channels })
    }

    /// Whether the decoded stream's own format already matches the
    /// target — if so no resampler is ever built.
    fn needs_resample(&self, frame: &AvAudioFrame) -> bool {
        frame.format() != TARGET_SAMPLE_FORMAT
            || frame.rate() != self.target_sample_rate
            || frame.channels() != self.target_channels
    }

    pub fn decode(&mut self, packet: Option<&ffmpeg::Packet>) -> Result<DecodeOutcome<AudioChunk>> {
        let mut frame = AvAudioFrame::empty();

        if self.decoder.receive_frame(&mut frame).is_ok() {
            return Ok(DecodeOutcome::Frame(self.finish_frame(&frame)?));
        }

        match packet {
            Some(p) => {
                self.decoder.send_packet(p).map_err(|e| ProducerError::DecodeError {
                    component: "audio_decoder",
                    codec: "unknown".into(),
                    reason: e.to_string(),
                })?;
                if self.decoder.receive_frame(&mut frame).is_ok() {
                    Ok(DecodeOutcome::Frame(self.finish_frame(&frame)?))
                } else {
                    Ok(DecodeOutcome::Empty)
                }
            }
            None => {
                let _ = self.decoder.send_eof();
                if self.decoder.receive_frame(&mut frame).is_ok() {
                    Ok(DecodeOutcome::Frame(self.finish_frame(&frame)?))
                } else {
                    self.decoder.flush();
                    Ok(DecodeOutcome::Flush)
                }
            }
        }
    }

    /// Drain any further frames already buffered from the last packet sent
    /// to `decode`, without submitting anything new. A single audio packet
    /// commonly holds several codec frames (PCM, high packet-duration
    /// codecs) — the caller loops this after `decode` until it returns
    /// `None` to collect all of them before moving to the next packet.
    pub fn drain_ready(&mut self) -> Result<Option<AudioChunk>> {
        let mut frame = AvAudioFrame::empty();
        if self.decoder.receive_frame(&mut frame).is_ok() {
            Ok(Some(self.finish_frame(&frame)?))
        } else {
            Ok(None)
        }
    }

    fn finish_frame(&mut self, frame: &AvAudioFrame) -> Result<AudioChunk> {
        let pts = frame.pts().unwrap_or(0);

        if !self.needs_resample(frame) {
            return Ok(samples_to_chunk(frame, self.target_channels, self.target_sample_rate, pts));
        }

        if self.resampler.is_none() {
            log::debug!(
                target: "clipcast_media::audio_decoder",
                "building resampler: {:?}/{}ch/{}Hz -> i32/{}ch/{}Hz",
                frame.format(), frame.channels(), frame.rate(),
                self.target_channels, self.target_sample_rate,
            );
            let target_layout = ChannelLayout::default(self.target_channels as i32);
            let resampler = SwrContext::get(
                frame.format(), frame.channel_layout(), frame.rate(),
                TARGET_SAMPLE_FORMAT, target_layout, self.target_sample_rate,
            )
            .map_err(|e| ProducerError::DecodeError {
                component: "audio_decoder",
                codec: "resampler".into(),
                reason: e.to_string(),
            })?;
            self.resampler = Some(resampler);
        }

        let resampler = self.resampler.as_mut().unwrap();
        let mut out = AvAudioFrame::empty();
        resampler.run(frame, &mut out).map_err(|e| ProducerError::DecodeError {
            component: "audio_decoder",
            codec: "resampler".into(),
            reason: e.to_string(),
        })?;

        Ok(samples_to_chunk(&out, self.target_channels, self.target_sample_rate, pts))
    }
}

fn samples_to_chunk(frame: &AvAudioFrame, channels: u16, sample_rate: u32, pts: i64) -> AudioChunk {
    let n = frame.samples();
    let raw = frame.data(0);
    let samples: Vec<i32> = raw
        .chunks_exact(4)
        .take(n * channels as usize)
        .map(|b| i32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    AudioChunk { channels, sample_rate, samples, pts }
}

#[cfg(test)]
mod tests {
    // Exercising `needs_resample`/`finish_frame` requires a real decoded
    // `AvAudioFrame`, which needs FFmpeg to construct — covered by the
    // fixture-gated integration tests in `frame_maker`, not here.
}
