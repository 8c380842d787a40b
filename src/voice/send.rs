//! Outbound frame providers pulled by the transport every tick.
//!
//! [`BasicSendHandler`] is a single queue popped directly. [`MixingSendHandler`]
//! keeps one queue per named source and mixes whatever is ready. Neither
//! schedules anything: the transport (or the session on its behalf) drives
//! them by calling [`AudioSendHandler::provide_20ms_audio`].

use std::{collections::HashMap, sync::Arc};

use parking_lot::{Mutex, RwLock};

use super::source::{AudioSource, OverflowNotifier, SourceProfile, enqueue_frame};
use crate::audio::{
    Frame, FrameMixer, FrameQueue, Lane, MixOutcome, MixReport, QueueStats, SendArbiter,
    constants::{MAX_PERCENT, MIXING_QUEUE_CAPACITY, SINGLE_QUEUE_CAPACITY},
    pcm,
};

/// Capability contract consumed by the transport.
pub trait AudioSendHandler: Send + Sync {
    fn can_provide(&self) -> bool;

    fn provide_20ms_audio(&self) -> Option<Frame>;

    /// Frames are always raw PCM.
    fn is_opus(&self) -> bool {
        false
    }
}

// ─── BasicSendHandler ────────────────────────────────────────────────────────

pub struct BasicSendHandler {
    queue: FrameQueue,
    notifier: RwLock<Option<OverflowNotifier>>,
}

impl Default for BasicSendHandler {
    fn default() -> Self {
        Self::new(SINGLE_QUEUE_CAPACITY)
    }
}

impl BasicSendHandler {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: FrameQueue::new(capacity),
            notifier: RwLock::new(None),
        }
    }

    pub fn queue_audio(&self, frame: impl Into<Frame>) {
        enqueue_frame(&self.queue, frame.into(), None, &self.notifier);
    }

    pub fn clear_queue(&self) -> usize {
        self.queue.clear()
    }

    pub fn queue_size(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }
}

impl AudioSendHandler for BasicSendHandler {
    fn can_provide(&self) -> bool {
        !self.queue.is_empty()
    }

    fn provide_20ms_audio(&self) -> Option<Frame> {
        self.queue.dequeue()
    }
}

// ─── MixingSendHandler ───────────────────────────────────────────────────────

/// Multi-source handler. The source set may change while ticks are running.
pub struct MixingSendHandler {
    sources: RwLock<HashMap<String, Arc<AudioSource>>>,
    capacity: usize,
    mixer: Mutex<FrameMixer>,
    notifier: RwLock<Option<OverflowNotifier>>,
}

impl Default for MixingSendHandler {
    fn default() -> Self {
        Self::new(MIXING_QUEUE_CAPACITY)
    }
}

impl MixingSendHandler {
    /// `capacity` applies to each source queue.
    pub fn new(capacity: usize) -> Self {
        Self {
            sources: RwLock::new(HashMap::new()),
            capacity,
            mixer: Mutex::new(FrameMixer::new()),
            notifier: RwLock::new(None),
        }
    }

    /// Returns `false` if the source already exists.
    pub fn add_audio_source(&self, source_id: &str) -> bool {
        self.insert_source(source_id, None)
    }

    pub fn add_audio_source_with(&self, source_id: &str, profile: SourceProfile) -> bool {
        self.insert_source(source_id, Some(profile))
    }

    fn insert_source(&self, source_id: &str, profile: Option<SourceProfile>) -> bool {
        let mut sources = self.sources.write();
        if sources.contains_key(source_id) {
            return false;
        }
        sources.insert(
            source_id.to_owned(),
            Arc::new(AudioSource::new(source_id, self.capacity, profile)),
        );
        true
    }

    /// `None` clears the profile so the source falls back to the defaults.
    pub fn set_source_profile(&self, source_id: &str, profile: Option<SourceProfile>) -> bool {
        match self.sources.read().get(source_id) {
            Some(source) => {
                source.set_profile(profile);
                true
            }
            None => false,
        }
    }

    /// Removes the source and drops its queued frames.
    pub fn remove_audio_source(&self, source_id: &str) -> bool {
        let removed = self.sources.write().remove(source_id);
        match removed {
            Some(source) => {
                source.queue().clear();
                true
            }
            None => false,
        }
    }

    /// Queues a frame, creating the source on first use.
    pub fn queue_audio(&self, source_id: &str, frame: impl Into<Frame>) {
        let existing = self.sources.read().get(source_id).cloned();
        let source = match existing {
            Some(source) => source,
            None => self
                .sources
                .write()
                .entry(source_id.to_owned())
                .or_insert_with(|| Arc::new(AudioSource::new(source_id, self.capacity, None)))
                .clone(),
        };
        enqueue_frame(source.queue(), frame.into(), Some(source_id), &self.notifier);
    }

    pub fn clear_source_queue(&self, source_id: &str) -> bool {
        match self.sources.read().get(source_id) {
            Some(source) => {
                source.queue().clear();
                true
            }
            None => false,
        }
    }

    /// Returns the number of frames discarded across all sources.
    pub fn clear_all_queues(&self) -> usize {
        self.sources.read().values().map(|s| s.queue().clear()).sum()
    }

    /// Zero for unknown sources.
    pub fn get_queue_size(&self, source_id: &str) -> usize {
        self.sources
            .read()
            .get(source_id)
            .map_or(0, |s| s.queue().len())
    }

    pub fn has_source(&self, source_id: &str) -> bool {
        self.sources.read().contains_key(source_id)
    }

    pub fn source_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sources.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn source_count(&self) -> usize {
        self.sources.read().len()
    }

    pub fn total_queued(&self) -> usize {
        self.sources.read().values().map(|s| s.queue().len()).sum()
    }

    pub fn dropped_frames(&self, source_id: &str) -> u64 {
        self.sources
            .read()
            .get(source_id)
            .map_or(0, |s| s.queue().dropped())
    }

    fn snapshot(&self) -> Vec<Arc<AudioSource>> {
        let mut sources: Vec<Arc<AudioSource>> = self.sources.read().values().cloned().collect();
        sources.sort_by(|a, b| a.id().cmp(b.id()));
        sources
    }

    /// Pops at most one frame from every non-empty source, without lanes.
    fn pop_frames(&self) -> Vec<Frame> {
        self.snapshot()
            .iter()
            .filter_map(|source| source.queue().dequeue())
            .collect()
    }

    /// Pops at most one frame from every non-empty source.
    fn pull(&self, inherited_priority: u8) -> Vec<(Lane, Frame)> {
        self.snapshot()
            .into_iter()
            .filter_map(|source| {
                let frame = source.queue().dequeue()?;
                Some((source.lane(inherited_priority), frame))
            })
            .collect()
    }

    fn mix(&self, frames: Vec<Frame>) -> MixOutcome {
        self.mixer.lock().mix(frames)
    }
}

impl AudioSendHandler for MixingSendHandler {
    fn can_provide(&self) -> bool {
        self.sources.read().values().any(|s| !s.queue().is_empty())
    }

    /// Unarbitrated tick: every source at unity gain.
    fn provide_20ms_audio(&self) -> Option<Frame> {
        self.mix(self.pop_frames()).frame
    }
}

// ─── SendHandler ─────────────────────────────────────────────────────────────

/// The handler a plugin registers for a guild.
#[derive(Clone)]
pub enum SendHandler {
    Single(Arc<BasicSendHandler>),
    Mixing(Arc<MixingSendHandler>),
}

impl From<Arc<BasicSendHandler>> for SendHandler {
    fn from(handler: Arc<BasicSendHandler>) -> Self {
        Self::Single(handler)
    }
}

impl From<Arc<MixingSendHandler>> for SendHandler {
    fn from(handler: Arc<MixingSendHandler>) -> Self {
        Self::Mixing(handler)
    }
}

/// Registration state the session hands to a tick.
pub(crate) struct TickContext<'a> {
    pub owner_key: &'a str,
    pub volume: u8,
    pub priority: u8,
}

/// Result of one arbitrated tick.
pub(crate) struct TickOutcome {
    pub mix: MixOutcome,
    pub max_active_priority: Option<u8>,
}

impl SendHandler {
    pub fn is_mixing(&self) -> bool {
        matches!(self, Self::Mixing(_))
    }

    pub fn as_mixing(&self) -> Option<&Arc<MixingSendHandler>> {
        match self {
            Self::Mixing(h) => Some(h),
            Self::Single(_) => None,
        }
    }

    pub fn as_single(&self) -> Option<&Arc<BasicSendHandler>> {
        match self {
            Self::Single(h) => Some(h),
            Self::Mixing(_) => None,
        }
    }

    pub fn total_queued(&self) -> usize {
        match self {
            Self::Single(h) => h.queue_size(),
            Self::Mixing(h) => h.total_queued(),
        }
    }

    pub fn clear_all(&self) -> usize {
        match self {
            Self::Single(h) => h.clear_queue(),
            Self::Mixing(h) => h.clear_all_queues(),
        }
    }

    fn notifier(&self) -> &RwLock<Option<OverflowNotifier>> {
        match self {
            Self::Single(h) => &h.notifier,
            Self::Mixing(h) => &h.notifier,
        }
    }

    pub(crate) fn attach(&self, notifier: OverflowNotifier) {
        *self.notifier().write() = Some(notifier);
    }

    pub(crate) fn detach(&self) {
        *self.notifier().write() = None;
    }

    /// Pulls, arbitrates, scales and mixes one frame.
    pub(crate) fn tick(&self, arbiter: &mut SendArbiter, ctx: &TickContext<'_>) -> TickOutcome {
        match self {
            Self::Single(_) => arbiter.retain(|key| key == ctx.owner_key),
            Self::Mixing(h) => {
                let sources = h.sources.read();
                arbiter.retain(|key| sources.contains_key(key));
            }
        }

        let pulled: Vec<(Lane, Frame)> = match self {
            Self::Single(h) => h
                .queue
                .dequeue()
                .map(|frame| {
                    (
                        Lane::new(ctx.owner_key, MAX_PERCENT, ctx.priority),
                        frame,
                    )
                })
                .into_iter()
                .collect(),
            Self::Mixing(h) => h.pull(ctx.priority),
        };

        if pulled.is_empty() {
            return TickOutcome {
                mix: MixOutcome::default(),
                max_active_priority: None,
            };
        }

        let (lanes, frames): (Vec<Lane>, Vec<Frame>) = pulled.into_iter().unzip();
        let effective = arbiter.arbitrate(&lanes);
        let master = ctx.volume as f32 / 100.0;

        let scaled: Vec<Frame> = frames
            .iter()
            .zip(effective)
            .map(|(frame, volume)| pcm::scale(frame, volume as f32 / 100.0 * master))
            .collect();

        let mix = match self {
            Self::Mixing(h) => h.mix(scaled),
            // One queue, nothing to mix.
            Self::Single(_) => {
                let frame = scaled.into_iter().next();
                let has_audio = frame.as_deref().is_some_and(|f| !pcm::is_silent(f));
                MixOutcome {
                    frame,
                    report: MixReport {
                        active_sources: 1,
                        bypassed: true,
                        has_audio,
                    },
                }
            }
        };

        TickOutcome {
            mix,
            max_active_priority: arbiter.last_max_priority(),
        }
    }
}

impl AudioSendHandler for SendHandler {
    fn can_provide(&self) -> bool {
        match self {
            Self::Single(h) => h.can_provide(),
            Self::Mixing(h) => h.can_provide(),
        }
    }

    fn provide_20ms_audio(&self) -> Option<Frame> {
        match self {
            Self::Single(h) => h.provide_20ms_audio(),
            Self::Mixing(h) => h.provide_20ms_audio(),
        }
    }
}
