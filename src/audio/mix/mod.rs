pub mod arbiter;
pub mod fade;
pub mod mixer;

pub use arbiter::{Lane, SendArbiter};
pub use fade::VolumeFade;
pub use mixer::{FrameMixer, MixOutcome, MixReport};
