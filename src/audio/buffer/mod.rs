pub mod queue;

pub use queue::{FrameQueue, QueueStats};

/// One opaque 20 ms PCM frame. Cloning is a reference-count bump.
pub type Frame = bytes::Bytes;
