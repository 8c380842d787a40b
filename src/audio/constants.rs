//! Central constants for the send/receive engine.
//!
//! Magic numbers in `src/audio/**` and `src/voice/**` live here so they can
//! be tuned in one place.

// ── Sample / PCM ─────────────────────────────────────────────────────────────

/// Output sample rate expected by the transport (Hz).
pub const TARGET_SAMPLE_RATE: u32 = 48_000;

/// Interleaved channel count.
pub const CHANNELS: usize = 2;

/// Bytes per 16-bit sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Samples per 20 ms stereo frame at 48 kHz (960 frames × 2 channels).
pub const FRAME_SIZE_SAMPLES: usize = 960 * CHANNELS;

/// Nominal size of one 20 ms PCM frame in bytes.
pub const FRAME_SIZE_BYTES: usize = FRAME_SIZE_SAMPLES * BYTES_PER_SAMPLE;

/// One tick of the send path.
pub const TICK_INTERVAL_MS: u64 = 20;

// ── Queues ───────────────────────────────────────────────────────────────────

/// Frame capacity of a single-source send handler (8 s of audio).
pub const SINGLE_QUEUE_CAPACITY: usize = 400;

/// Frame capacity of each source inside a mixing send handler (4 s of audio).
pub const MIXING_QUEUE_CAPACITY: usize = 200;

// ── Arbitration ──────────────────────────────────────────────────────────────

/// Priority at or above which a source ducks lower-priority sources.
pub const DEFAULT_PRIORITY_THRESHOLD: u8 = 70;

/// Gain applied to a ducked source.
pub const DEFAULT_DUCK_FACTOR: f32 = 0.25;

/// Volume given to mixing sources registered without a profile.
pub const DEFAULT_SOURCE_VOLUME: u8 = 100;

/// Upper bound for volume, priority and threshold.
pub const MAX_PERCENT: u8 = 100;
