//! Typed listener registry.
//!
//! Listeners subscribe to one [`EventKind`] at an [`EventPriority`]. A
//! dispatch walks the bands from `Lowest` to `Monitor`; once a band has
//! finished with the event cancelled, only `Monitor` listeners still run.
//! `Monitor` listeners observe the final outcome and cannot change it.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::RwLock;
use tracing::trace;

use super::events::{EventKind, VoiceEvent};
use crate::common::types::PluginId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventPriority {
    Lowest,
    Low,
    Normal,
    High,
    Highest,
    Monitor,
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type Listener = Arc<dyn Fn(&mut EventContext<'_>) + Send + Sync>;

/// What a listener sees during dispatch.
pub struct EventContext<'a> {
    event: &'a VoiceEvent,
    cancelled: bool,
    monitoring: bool,
}

impl<'a> EventContext<'a> {
    pub fn event(&self) -> &'a VoiceEvent {
        self.event
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Vetoes a cancellable event. Ignored for other events and in `Monitor`.
    pub fn set_cancelled(&mut self, cancelled: bool) {
        if self.event.is_cancellable() && !self.monitoring {
            self.cancelled = cancelled;
        }
    }

    pub fn cancel(&mut self) {
        self.set_cancelled(true);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchResult {
    pub cancelled: bool,
    pub delivered: usize,
}

struct Subscription {
    id: ListenerId,
    owner: Option<PluginId>,
    priority: EventPriority,
    listener: Listener,
}

#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<EventKind, Vec<Subscription>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(
        &self,
        kind: EventKind,
        priority: EventPriority,
        owner: Option<PluginId>,
        listener: F,
    ) -> ListenerId
    where
        F: Fn(&mut EventContext<'_>) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut listeners = self.listeners.write();
        let band = listeners.entry(kind).or_default();
        // Insert after every listener of the same or lower priority so that
        // registration order is kept within a band.
        let pos = band.partition_point(|s| s.priority <= priority);
        band.insert(
            pos,
            Subscription {
                id,
                owner,
                priority,
                listener: Arc::new(listener),
            },
        );
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        for band in listeners.values_mut() {
            if let Some(pos) = band.iter().position(|s| s.id == id) {
                band.remove(pos);
                return true;
            }
        }
        false
    }

    /// Drops every listener registered by `owner`; returns how many.
    pub fn unsubscribe_owner(&self, owner: &PluginId) -> usize {
        let mut listeners = self.listeners.write();
        let mut removed = 0;
        for band in listeners.values_mut() {
            let before = band.len();
            band.retain(|s| s.owner.as_ref() != Some(owner));
            removed += before - band.len();
        }
        removed
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.read().get(&kind).map_or(0, Vec::len)
    }

    pub fn has_listeners(&self, kind: EventKind) -> bool {
        self.listener_count(kind) > 0
    }

    /// Delivers `event` synchronously. Must not be called with a guild lock held.
    pub fn dispatch(&self, event: &VoiceEvent) -> DispatchResult {
        let snapshot: Vec<(EventPriority, Listener)> = match self.listeners.read().get(&event.kind()) {
            Some(band) => band
                .iter()
                .map(|s| (s.priority, s.listener.clone()))
                .collect(),
            None => return DispatchResult::default(),
        };

        trace!(
            "Dispatching {} to {} listener(s)",
            serde_json::to_string(event).unwrap_or_default(),
            snapshot.len()
        );

        let mut ctx = EventContext {
            event,
            cancelled: false,
            monitoring: false,
        };
        let mut delivered = 0;
        let mut band: Option<EventPriority> = None;
        let mut skipping = false;

        for (priority, listener) in snapshot {
            if band != Some(priority) {
                band = Some(priority);
                ctx.monitoring = priority == EventPriority::Monitor;
                skipping = ctx.cancelled && !ctx.monitoring;
            }
            if skipping {
                continue;
            }
            listener(&mut ctx);
            delivered += 1;
        }

        DispatchResult {
            cancelled: ctx.cancelled,
            delivered,
        }
    }

    /// Dispatches a batch collected while a lock was held.
    pub fn dispatch_all(&self, events: impl IntoIterator<Item = VoiceEvent>) {
        for event in events {
            self.dispatch(&event);
        }
    }
}
