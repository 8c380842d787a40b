//! A named audio source inside a mixing send handler.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::{
    api::{EventBus, VoiceEvent},
    audio::{Frame, FrameQueue, Lane, constants::DEFAULT_SOURCE_VOLUME},
    common::{
        errors::{VoiceResult, check_percent},
        types::GuildId,
    },
};

/// Volume and priority a source competes with during arbitration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceProfile {
    pub volume: u8,
    pub priority: u8,
}

impl SourceProfile {
    pub fn new(volume: i32, priority: i32) -> VoiceResult<Self> {
        Ok(Self {
            volume: check_percent("volume", volume)?,
            priority: check_percent("priority", priority)?,
        })
    }
}

pub struct AudioSource {
    id: String,
    queue: FrameQueue,
    profile: RwLock<Option<SourceProfile>>,
}

impl AudioSource {
    pub fn new(id: impl Into<String>, capacity: usize, profile: Option<SourceProfile>) -> Self {
        Self {
            id: id.into(),
            queue: FrameQueue::new(capacity),
            profile: RwLock::new(profile),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn queue(&self) -> &FrameQueue {
        &self.queue
    }

    pub fn profile(&self) -> Option<SourceProfile> {
        *self.profile.read()
    }

    pub fn set_profile(&self, profile: Option<SourceProfile>) {
        *self.profile.write() = profile;
    }

    /// Sources without a profile play at full volume with the owning
    /// registration's priority.
    pub fn lane(&self, inherited_priority: u8) -> Lane {
        match self.profile() {
            Some(p) => Lane::new(self.id.clone(), p.volume, p.priority),
            None => Lane::new(self.id.clone(), DEFAULT_SOURCE_VOLUME, inherited_priority),
        }
    }
}

/// Reports dropped frames to the event bus of the guild a handler is
/// registered in.
#[derive(Clone)]
pub(crate) struct OverflowNotifier {
    pub guild_id: GuildId,
    pub events: Arc<EventBus>,
}

impl OverflowNotifier {
    pub fn notify(&self, source_id: Option<&str>, dropped: u64) {
        self.events.dispatch(&VoiceEvent::QueueOverflow {
            guild_id: self.guild_id.clone(),
            source_id: source_id.map(str::to_owned),
            dropped,
        });
    }
}

/// Shared enqueue path: logs and reports an eviction, never fails.
pub(crate) fn enqueue_frame(
    queue: &FrameQueue,
    frame: Frame,
    source_id: Option<&str>,
    notifier: &RwLock<Option<OverflowNotifier>>,
) {
    if queue.enqueue(frame).is_none() {
        return;
    }

    let dropped = queue.dropped();
    tracing::debug!(
        "Frame queue full (capacity {}), dropped oldest frame of source {} ({} total)",
        queue.capacity(),
        source_id.unwrap_or("main"),
        dropped
    );
    let notifier = notifier.read().clone();
    if let Some(notifier) = notifier {
        notifier.notify(source_id, dropped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_validation() {
        assert!(SourceProfile::new(100, 80).is_ok());
        assert!(SourceProfile::new(101, 80).is_err());
        assert!(SourceProfile::new(50, -3).is_err());
    }

    #[test]
    fn test_lane_inherits_priority_without_profile() {
        let source = AudioSource::new("music", 4, None);
        assert_eq!(source.lane(35), Lane::new("music", 100, 35));

        source.set_profile(Some(SourceProfile::new(60, 90).unwrap()));
        assert_eq!(source.lane(35), Lane::new("music", 60, 90));
    }
}
