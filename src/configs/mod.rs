pub mod base;
pub mod engine;
pub mod logging;

pub use base::*;
pub use engine::*;
pub use logging::*;
