pub mod buffer;
pub mod constants;
pub mod mix;
pub mod pcm;

pub use buffer::{Frame, FrameQueue, QueueStats};
pub use mix::{FrameMixer, Lane, MixOutcome, MixReport, SendArbiter, VolumeFade};
