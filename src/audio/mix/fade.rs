//! Linear, time-driven volume ramp for a send registration.
//!
//! Unlike a per-sample gain ramp, a registration's volume only changes once
//! per tick, so the fade is evaluated against the tick's `Instant`.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeFade {
    from: u8,
    target: u8,
    started: Instant,
    deadline: Instant,
}

impl VolumeFade {
    pub fn new(from: u8, target: u8, now: Instant, duration: Duration) -> Self {
        Self {
            from,
            target,
            started: now,
            deadline: now + duration,
        }
    }

    pub fn target(&self) -> u8 {
        self.target
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_complete(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Volume at `now`, interpolated between the start and the target.
    pub fn value_at(&self, now: Instant) -> u8 {
        if self.is_complete(now) {
            return self.target;
        }
        let total = self.deadline.duration_since(self.started).as_secs_f32();
        let elapsed = now.saturating_duration_since(self.started).as_secs_f32();
        let t = (elapsed / total).clamp(0.0, 1.0);

        let from = self.from as f32;
        let value = from + (self.target as f32 - from) * t;
        value.round().clamp(0.0, 100.0) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_interpolation() {
        let start = Instant::now();
        let fade = VolumeFade::new(100, 0, start, Duration::from_millis(1000));

        assert_eq!(fade.value_at(start), 100);
        assert_eq!(fade.value_at(start + Duration::from_millis(250)), 75);
        assert_eq!(fade.value_at(start + Duration::from_millis(500)), 50);
        assert!(!fade.is_complete(start + Duration::from_millis(999)));
        assert_eq!(fade.value_at(start + Duration::from_millis(1000)), 0);
        assert!(fade.is_complete(start + Duration::from_millis(1500)));
    }

    #[test]
    fn test_fade_up() {
        let start = Instant::now();
        let fade = VolumeFade::new(20, 60, start, Duration::from_millis(400));
        assert_eq!(fade.value_at(start + Duration::from_millis(200)), 40);
        assert_eq!(fade.target(), 60);
    }

    #[test]
    fn test_zero_duration_completes_immediately() {
        let start = Instant::now();
        let fade = VolumeFade::new(10, 90, start, Duration::ZERO);
        assert!(fade.is_complete(start));
        assert_eq!(fade.value_at(start), 90);
    }
}
