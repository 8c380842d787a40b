//! Per-guild voice audio arbitration and mixing.
//!
//! Plugins register send and receive handlers per guild through
//! [`voice::AudioSessionRegistry`]. A transport pulls one mixed 20 ms PCM
//! frame per guild and tick, and pushes decoded inbound audio back in.

pub mod api;
pub mod audio;
pub mod common;
pub mod configs;
pub mod voice;
