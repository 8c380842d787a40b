//! Helpers over raw 16-bit signed stereo PCM frames.
//!
//! Frames travel through the engine as opaque `Bytes`; these helpers are the
//! only place that interprets them as samples.

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};

use crate::audio::constants::{BYTES_PER_SAMPLE, CHANNELS, FRAME_SIZE_SAMPLES, TARGET_SAMPLE_RATE};

/// Sample byte order used by the transport.
pub type PcmOrder = BigEndian;

/// Truncates a byte length to a whole number of 16-bit samples.
#[inline]
pub fn whole_samples(len: usize) -> usize {
    len - len % BYTES_PER_SAMPLE
}

/// Reads sample `index` from a PCM frame.
#[inline]
pub fn sample_at(frame: &[u8], index: usize) -> i16 {
    let offset = index * BYTES_PER_SAMPLE;
    PcmOrder::read_i16(&frame[offset..offset + BYTES_PER_SAMPLE])
}

/// `true` when every whole sample in `frame` is zero.
pub fn is_silent(frame: &[u8]) -> bool {
    frame[..whole_samples(frame.len())].iter().all(|&b| b == 0)
}

#[inline]
pub fn is_unity(gain: f32) -> bool {
    (gain - 1.0).abs() < f32::EPSILON
}

/// Applies a linear gain to every sample, clamping to the i16 range.
///
/// Unity gain hands back the same buffer without copying, so a frame that is
/// not attenuated stays byte-for-byte identical. A trailing half sample is
/// dropped when scaling.
pub fn scale(frame: &Bytes, gain: f32) -> Bytes {
    if is_unity(gain) {
        return frame.clone();
    }

    let len = whole_samples(frame.len());
    let mut out = BytesMut::with_capacity(len);
    if gain <= 0.0 {
        out.put_bytes(0, len);
        return out.freeze();
    }

    for chunk in frame[..len].chunks_exact(BYTES_PER_SAMPLE) {
        let scaled = (PcmOrder::read_i16(chunk) as f32 * gain)
            .round()
            .clamp(i16::MIN as f32, i16::MAX as f32);
        out.put_i16(scaled as i16);
    }
    out.freeze()
}

/// Encodes interleaved samples into a frame.
pub fn encode(samples: &[i16]) -> Bytes {
    let mut out = BytesMut::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for &s in samples {
        out.put_i16(s);
    }
    out.freeze()
}

/// One 20 ms stereo sine frame starting at sample position `start`.
///
/// Used by the demo binary and by tests that need recognisable audio.
pub fn tone(freq_hz: f32, amplitude: i16, start: u64) -> Bytes {
    let frames = FRAME_SIZE_SAMPLES / CHANNELS;
    let mut samples = Vec::with_capacity(FRAME_SIZE_SAMPLES);
    for i in 0..frames as u64 {
        let t = (start + i) as f32 / TARGET_SAMPLE_RATE as f32;
        let value = (t * freq_hz * std::f32::consts::TAU).sin() * amplitude as f32;
        let value = value.round() as i16;
        for _ in 0..CHANNELS {
            samples.push(value);
        }
    }
    encode(&samples)
}
