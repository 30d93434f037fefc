// crates/clipcast-media/src/layer_tap.rs
//
// Lets one channel layer's already-composited output feed a producer on
// another layer. Grounded in `layer_producer.cpp`'s `layer_consumer`: a
// bounded queue fed by `send()`/`visit()`, drained by `receive()` which
// returns a "late" sentinel rather than blocking when nothing is queued
// yet. Capacity is 3 here rather than the original's 100 — a tap sits
// downstream of a live mixer tick, so a deep backlog just means stale
// frames catching up later; 3 bounds that staleness to a few ticks.
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use clipcast_core::types::OutputFrame;

const CAPACITY: usize = 3;

pub struct LayerTap {
    tx: Sender<OutputFrame>,
    rx: Receiver<OutputFrame>,
    last_frame: std::sync::Mutex<OutputFrame>,
    frame_number: std::sync::atomic::AtomicU64,
}

impl LayerTap {
    pub fn new() -> Self {
        let (tx, rx) = bounded(CAPACITY);
        Self {
            tx,
            rx,
            last_frame: std::sync::Mutex::new(OutputFrame::Eof),
            frame_number: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Push a frame from the source layer's mixer tick. Drops the frame
    /// silently when the queue is full — a producer tap must never block
    /// the channel that's feeding it.
    pub fn push(&self, frame: OutputFrame) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(frame) {
            log::trace!(target: "clipcast_media::layer_tap", "tap queue full, dropping frame");
        }
    }

    /// Drain the next tapped frame, or `OutputFrame::Late` if none is
    /// queued yet — this is not an error, just the tap running ahead of
    /// its source.
    pub fn receive(&self) -> OutputFrame {
        match self.rx.try_recv() {
            Ok(frame) => {
                *self.last_frame.lock().unwrap() = frame.clone();
                self.frame_number.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                frame
            }
            Err(_) => OutputFrame::Late,
        }
    }

    pub fn last_frame(&self) -> OutputFrame {
        self.last_frame.lock().unwrap().clone()
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number.load(std::sync::atomic::Ordering::Relaxed)
    }
}

impl Default for LayerTap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipcast_core::format::FieldMode;
    use clipcast_core::types::{AudioChunk, RawPicture};

    fn frame() -> OutputFrame {
        OutputFrame::Frame {
            video: RawPicture {
                width: 1,
                height: 1,
                pixel_format: clipcast_core::pixel::BGRA,
                data: vec![0, 0, 0, 0],
                field_mode: FieldMode::Progressive,
                pts: 0,
            },
            audio: AudioChunk { channels: 2, sample_rate: 48000, samples: vec![0, 0], pts: 0 },
        }
    }

    #[test]
    fn receive_is_late_when_empty() {
        let tap = LayerTap::new();
        assert!(matches!(tap.receive(), OutputFrame::Late));
    }

    #[test]
    fn push_then_receive_round_trips() {
        let tap = LayerTap::new();
        tap.push(frame());
        assert!(matches!(tap.receive(), OutputFrame::Frame { .. }));
        assert_eq!(tap.frame_number(), 1);
    }

    #[test]
    fn overflow_drops_oldest_attempt_not_panics() {
        let tap = LayerTap::new();
        for _ in 0..(CAPACITY + 5) {
            tap.push(frame());
        }
        let mut count = 0;
        while matches!(tap.receive(), OutputFrame::Frame { .. }) {
            count += 1;
        }
        assert_eq!(count, CAPACITY);
    }
}
