//! `SendArbiter`: per-guild priority ducking.
//!
//! Each tick the send path hands over one [`Lane`] per source that has a
//! frame ready. The highest priority among them decides whether ducking is
//! in force: when it reaches the threshold, every lane below the threshold
//! plays at `volume * duck_factor`.

use std::collections::HashMap;

use crate::audio::constants::{DEFAULT_DUCK_FACTOR, DEFAULT_PRIORITY_THRESHOLD, MAX_PERCENT};

/// A source competing for the current tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lane {
    pub key: String,
    pub volume: u8,
    pub priority: u8,
}

impl Lane {
    pub fn new(key: impl Into<String>, volume: u8, priority: u8) -> Self {
        Self {
            key: key.into(),
            volume,
            priority,
        }
    }
}

pub struct SendArbiter {
    threshold: u8,
    duck_factor: f32,
    /// Effective volume of each lane as of the last tick it was active in.
    effective: HashMap<String, u8>,
    last_max_priority: Option<u8>,
}

impl Default for SendArbiter {
    fn default() -> Self {
        Self::new(DEFAULT_PRIORITY_THRESHOLD, DEFAULT_DUCK_FACTOR)
    }
}

impl SendArbiter {
    pub fn new(threshold: u8, duck_factor: f32) -> Self {
        Self {
            threshold: threshold.min(MAX_PERCENT),
            duck_factor: duck_factor.clamp(0.0, 1.0),
            effective: HashMap::new(),
            last_max_priority: None,
        }
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    /// Takes effect on the next call to [`arbitrate`](Self::arbitrate).
    pub fn set_threshold(&mut self, threshold: u8) {
        self.threshold = threshold.min(MAX_PERCENT);
    }

    pub fn duck_factor(&self) -> f32 {
        self.duck_factor
    }

    pub fn max_active_priority(lanes: &[Lane]) -> Option<u8> {
        lanes.iter().map(|l| l.priority).max()
    }

    pub fn is_ducked(&self, priority: u8, max_active: Option<u8>) -> bool {
        priority < self.threshold && max_active.is_some_and(|max| max >= self.threshold)
    }

    /// Effective volume of a `(volume, priority)` pair under `max_active`.
    pub fn duck(&self, volume: u8, priority: u8, max_active: Option<u8>) -> u8 {
        if self.is_ducked(priority, max_active) {
            (volume as f32 * self.duck_factor).round() as u8
        } else {
            volume
        }
    }

    /// Computes the effective volume of every lane, in input order.
    pub fn arbitrate(&mut self, lanes: &[Lane]) -> Vec<u8> {
        let max_active = Self::max_active_priority(lanes);
        self.last_max_priority = max_active;

        lanes
            .iter()
            .map(|lane| {
                let effective = self.duck(lane.volume, lane.priority, max_active);
                if let Some(slot) = self.effective.get_mut(&lane.key) {
                    *slot = effective;
                } else {
                    self.effective.insert(lane.key.clone(), effective);
                }
                effective
            })
            .collect()
    }

    /// Highest priority seen in the last arbitrated tick.
    pub fn last_max_priority(&self) -> Option<u8> {
        self.last_max_priority
    }

    pub fn effective_volume(&self, key: &str) -> Option<u8> {
        self.effective.get(key).copied()
    }

    /// Drops the remembered volume of every lane `live` rejects.
    pub fn retain(&mut self, mut live: impl FnMut(&str) -> bool) {
        self.effective.retain(|key, _| live(key));
    }

    pub fn reset(&mut self) {
        self.effective.clear();
        self.last_max_priority = None;
    }
}
