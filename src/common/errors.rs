use thiserror::Error;

/// Errors surfaced synchronously by the registration API.
///
/// No-op conditions (double registration, unknown source, deregistering
/// something that is not there) are reported as `Ok(false)`, never as an
/// error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VoiceError {
    #[error("invalid argument: {name} must be within [0, 100], got {value}")]
    InvalidArgument { name: &'static str, value: i32 },
}

/// Failures reported by the voice transport. Join and leave log these and
/// report a plain `false` to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("failed to connect to channel {channel}: {reason}")]
    ConnectFailed { channel: u64, reason: String },

    #[error("failed to disconnect: {0}")]
    DisconnectFailed(String),

    #[error("not connected")]
    NotConnected,
}

pub type VoiceResult<T> = std::result::Result<T, VoiceError>;

/// Validates a percentage-like argument (volume, priority, threshold).
pub fn check_percent(name: &'static str, value: i32) -> VoiceResult<u8> {
    if (0..=100).contains(&value) {
        Ok(value as u8)
    } else {
        Err(VoiceError::InvalidArgument { name, value })
    }
}
