use serde::{Deserialize, Serialize};

use crate::audio::constants::{
    DEFAULT_DUCK_FACTOR, DEFAULT_PRIORITY_THRESHOLD, MIXING_QUEUE_CAPACITY, SINGLE_QUEUE_CAPACITY,
    TICK_INTERVAL_MS,
};

/// Tunables for the send/receive engine. Every field has a default so an
/// empty `[engine]` table (or none at all) is valid.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EngineConfig {
    #[serde(default = "default_priority_threshold")]
    pub default_priority_threshold: u8,
    #[serde(default = "default_duck_factor")]
    pub duck_factor: f32,
    #[serde(default = "default_single_queue_capacity")]
    pub single_queue_capacity: usize,
    #[serde(default = "default_source_queue_capacity")]
    pub source_queue_capacity: usize,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_priority_threshold: default_priority_threshold(),
            duck_factor: default_duck_factor(),
            single_queue_capacity: default_single_queue_capacity(),
            source_queue_capacity: default_source_queue_capacity(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.default_priority_threshold > 100 {
            return Err(format!(
                "engine.default_priority_threshold must be within [0, 100], got {}",
                self.default_priority_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.duck_factor) {
            return Err(format!(
                "engine.duck_factor must be within [0.0, 1.0], got {}",
                self.duck_factor
            ));
        }
        if self.single_queue_capacity == 0 || self.source_queue_capacity == 0 {
            return Err("engine queue capacities must be non-zero".to_string());
        }
        if self.tick_interval_ms == 0 {
            return Err("engine.tick_interval_ms must be non-zero".to_string());
        }
        Ok(())
    }
}

fn default_priority_threshold() -> u8 {
    DEFAULT_PRIORITY_THRESHOLD
}

fn default_duck_factor() -> f32 {
    DEFAULT_DUCK_FACTOR
}

fn default_single_queue_capacity() -> usize {
    SINGLE_QUEUE_CAPACITY
}

fn default_source_queue_capacity() -> usize {
    MIXING_QUEUE_CAPACITY
}

fn default_tick_interval_ms() -> u64 {
    TICK_INTERVAL_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_table_uses_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.default_priority_threshold, 70);
        assert_eq!(config.single_queue_capacity, 400);
        assert_eq!(config.source_queue_capacity, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let config = EngineConfig {
            duck_factor: 1.5,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            default_priority_threshold: 101,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
