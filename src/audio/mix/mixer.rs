//! Combines the frames pulled for one tick.
//!
//! Inputs are already volume-scaled. Zero frames yield nothing, a single
//! frame is passed through untouched, two or more are summed sample by
//! sample in an `i32` accumulator and clamped back to the i16 range.

use bytes::{BufMut, BytesMut};

use crate::audio::{
    buffer::Frame,
    constants::{BYTES_PER_SAMPLE, FRAME_SIZE_SAMPLES},
    pcm,
};

/// What happened during one mix, for observability only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MixReport {
    /// Frames that took part in the mix (malformed ones excluded).
    pub active_sources: usize,
    /// `true` when a single frame was returned without mixing.
    pub bypassed: bool,
    /// `true` when the output contains at least one non-zero sample.
    pub has_audio: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MixOutcome {
    pub frame: Option<Frame>,
    pub report: MixReport,
}

/// Reusable mixer; keeps its accumulator between ticks.
pub struct FrameMixer {
    acc_buf: Vec<i32>,
}

impl Default for FrameMixer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameMixer {
    pub fn new() -> Self {
        Self {
            acc_buf: Vec::with_capacity(FRAME_SIZE_SAMPLES),
        }
    }

    pub fn mix(&mut self, mut frames: Vec<Frame>) -> MixOutcome {
        // A frame without a single whole sample cannot contribute.
        frames.retain(|f| pcm::whole_samples(f.len()) > 0);

        match frames.len() {
            0 => MixOutcome::default(),
            1 => {
                let frame = frames.pop();
                let has_audio = frame.as_deref().is_some_and(|f| !pcm::is_silent(f));
                MixOutcome {
                    frame,
                    report: MixReport {
                        active_sources: 1,
                        bypassed: true,
                        has_audio,
                    },
                }
            }
            active_sources => {
                let frame = self.sum(&frames);
                let has_audio = !pcm::is_silent(&frame);
                MixOutcome {
                    frame: Some(frame),
                    report: MixReport {
                        active_sources,
                        bypassed: false,
                        has_audio,
                    },
                }
            }
        }
    }

    /// Saturating sum over the shortest frame; longer tails are dropped.
    fn sum(&mut self, frames: &[Frame]) -> Frame {
        let min_len = frames
            .iter()
            .map(|f| pcm::whole_samples(f.len()))
            .min()
            .unwrap_or(0);
        let samples = min_len / BYTES_PER_SAMPLE;

        self.acc_buf.clear();
        self.acc_buf.resize(samples, 0);

        for frame in frames {
            for (i, acc) in self.acc_buf.iter_mut().enumerate() {
                *acc += pcm::sample_at(frame, i) as i32;
            }
        }

        let mut out = BytesMut::with_capacity(min_len);
        for &sum in &self.acc_buf {
            out.put_i16(sum.clamp(i16::MIN as i32, i16::MAX as i32) as i16);
        }
        out.freeze()
    }
}
