//! Per-guild audio state: the send and receive slots, the arbiter and the
//! connection lifecycle.
//!
//! Lock discipline:
//! - `slots` is the per-guild lock. It is never held across an `.await` and
//!   never while events are dispatched; events are collected under it and
//!   dispatched after release.
//! - `lifecycle` serializes join, leave and teardown so that only one
//!   transport call is in flight per guild.
//! - The ownership index is always locked after `slots`, never before.
//! - A session the registry has dropped is marked retired under `slots`.
//!   Writes that find it retired return `None` so the caller can retry on
//!   the guild's replacement session.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    receive::{AudioReceiveHandler, ReceiveHandler},
    send::{AudioSendHandler, SendHandler, TickContext},
    source::OverflowNotifier,
    transport::VoiceTransport,
};
use crate::{
    api::{EventBus, EventKind, RemovalReason, VoiceEvent},
    audio::{Frame, SendArbiter, VolumeFade, pcm},
    common::{
        errors::{VoiceResult, check_percent},
        types::{ChannelId, GuildId, PluginId, SlotKind, UserId},
    },
    configs::EngineConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        };
        f.write_str(s)
    }
}

/// `channel` is set iff `state` is `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Connection {
    state: ConnectionState,
    channel: Option<ChannelId>,
}

impl Connection {
    const DISCONNECTED: Self = Self {
        state: ConnectionState::Disconnected,
        channel: None,
    };

    fn transitional(state: ConnectionState) -> Self {
        Self {
            state,
            channel: None,
        }
    }

    fn connected(channel: ChannelId) -> Self {
        Self {
            state: ConnectionState::Connected,
            channel: Some(channel),
        }
    }
}

pub struct SendRegistration {
    pub id: Uuid,
    pub owner: PluginId,
    pub handler: SendHandler,
    pub volume: u8,
    pub priority: u8,
    /// Volume after ducking, as of the last tick.
    pub effective_volume: u8,
    pub fade: Option<VolumeFade>,
}

pub struct ReceiveRegistration {
    pub owner: PluginId,
    pub handler: ReceiveHandler,
}

/// Reverse index `plugin -> {(guild, slot)}` used for bulk teardown.
#[derive(Default)]
pub(crate) struct OwnershipIndex {
    entries: Mutex<HashMap<PluginId, HashSet<(GuildId, SlotKind)>>>,
}

impl OwnershipIndex {
    pub fn insert(&self, plugin: &PluginId, guild: &GuildId, slot: SlotKind) {
        self.entries
            .lock()
            .entry(plugin.clone())
            .or_default()
            .insert((guild.clone(), slot));
    }

    pub fn remove(&self, plugin: &PluginId, guild: &GuildId, slot: SlotKind) {
        let mut entries = self.entries.lock();
        if let Some(owned) = entries.get_mut(plugin) {
            owned.remove(&(guild.clone(), slot));
            if owned.is_empty() {
                entries.remove(plugin);
            }
        }
    }

    /// Removes and returns everything `plugin` owns.
    pub fn take(&self, plugin: &PluginId) -> Vec<(GuildId, SlotKind)> {
        self.entries
            .lock()
            .remove(plugin)
            .map(|owned| owned.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn owned_by(&self, plugin: &PluginId) -> Vec<(GuildId, SlotKind)> {
        self.entries
            .lock()
            .get(plugin)
            .map(|owned| owned.iter().cloned().collect())
            .unwrap_or_default()
    }
}

struct Slots {
    send: Option<SendRegistration>,
    receive: Option<ReceiveRegistration>,
    arbiter: SendArbiter,
    retired: bool,
}

pub struct AudioSession {
    guild_id: GuildId,
    slots: Mutex<Slots>,
    connection: Mutex<Connection>,
    lifecycle: tokio::sync::Mutex<()>,
    events: Arc<EventBus>,
    transport: Arc<dyn VoiceTransport>,
    ownership: Arc<OwnershipIndex>,
    default_threshold: u8,
    frames_sent: AtomicU64,
    frames_nulled: AtomicU64,
}

impl AudioSession {
    pub(crate) fn new(
        guild_id: GuildId,
        events: Arc<EventBus>,
        transport: Arc<dyn VoiceTransport>,
        ownership: Arc<OwnershipIndex>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            guild_id,
            slots: Mutex::new(Slots {
                send: None,
                receive: None,
                arbiter: SendArbiter::new(config.default_priority_threshold, config.duck_factor),
                retired: false,
            }),
            connection: Mutex::new(Connection::DISCONNECTED),
            lifecycle: tokio::sync::Mutex::new(()),
            events,
            transport,
            ownership,
            default_threshold: config.default_priority_threshold,
            frames_sent: AtomicU64::new(0),
            frames_nulled: AtomicU64::new(0),
        }
    }

    pub fn guild_id(&self) -> &GuildId {
        &self.guild_id
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.lock().state
    }

    pub fn connected_channel(&self) -> Option<ChannelId> {
        self.connection.lock().channel
    }

    fn set_connection(&self, connection: Connection) {
        *self.connection.lock() = connection;
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn frames_nulled(&self) -> u64 {
        self.frames_nulled.load(Ordering::Relaxed)
    }

    /// No registrations, no connection and no guild-level configuration
    /// beyond the defaults.
    pub fn is_idle(&self) -> bool {
        self.idle_locked(&self.slots.lock())
    }

    fn idle_locked(&self, slots: &Slots) -> bool {
        slots.send.is_none()
            && slots.receive.is_none()
            && slots.arbiter.threshold() == self.default_threshold
            && self.connection_state() == ConnectionState::Disconnected
    }

    pub fn is_retired(&self) -> bool {
        self.slots.lock().retired
    }

    /// Retires the session if it is idle. Checked and set under the slot
    /// lock, so no registration can land in between.
    pub(crate) fn retire_if_idle(&self) -> bool {
        let mut slots = self.slots.lock();
        if slots.retired || !self.idle_locked(&slots) {
            return false;
        }
        slots.retired = true;
        true
    }

    pub(crate) fn retire(&self) {
        self.slots.lock().retired = true;
    }

    // ─── Send slot ───────────────────────────────────────────────────────────

    /// `Ok(false)` if the slot is already taken, by this plugin or another.
    pub fn register_send_handler(
        &self,
        plugin: &PluginId,
        handler: SendHandler,
        volume: i32,
        priority: i32,
    ) -> VoiceResult<bool> {
        Ok(self
            .try_register_send_handler(plugin, handler, volume, priority)?
            .unwrap_or(false))
    }

    /// Like [`register_send_handler`](Self::register_send_handler), with
    /// `Ok(None)` when the session has been retired.
    pub(crate) fn try_register_send_handler(
        &self,
        plugin: &PluginId,
        handler: SendHandler,
        volume: i32,
        priority: i32,
    ) -> VoiceResult<Option<bool>> {
        let volume = check_percent("volume", volume)?;
        let priority = check_percent("priority", priority)?;

        let event = {
            let mut slots = self.slots.lock();
            if slots.retired {
                return Ok(None);
            }
            if let Some(current) = &slots.send {
                debug!(
                    "[{}] Send slot already held by {}, rejecting {}",
                    self.guild_id, current.owner, plugin
                );
                return Ok(Some(false));
            }

            let id = Uuid::new_v4();
            handler.attach(self.overflow_notifier());
            let mixing = handler.is_mixing();
            slots.send = Some(SendRegistration {
                id,
                owner: plugin.clone(),
                handler,
                volume,
                priority,
                effective_volume: volume,
                fade: None,
            });
            self.ownership.insert(plugin, &self.guild_id, SlotKind::Send);

            VoiceEvent::SendHandlerRegistered {
                guild_id: self.guild_id.clone(),
                plugin_id: plugin.clone(),
                registration_id: id,
                mixing,
                volume,
                priority,
            }
        };

        info!(
            "[{}] Send handler registered by {} (volume: {}, priority: {})",
            self.guild_id, plugin, volume, priority
        );
        self.events.dispatch(&event);
        Ok(Some(true))
    }

    pub fn deregister_send_handler(&self, plugin: &PluginId) -> bool {
        self.release_send(plugin, RemovalReason::Deregistered)
    }

    fn release_send(&self, plugin: &PluginId, reason: RemovalReason) -> bool {
        let removed = {
            let mut slots = self.slots.lock();
            if slots.send.as_ref().is_none_or(|r| &r.owner != plugin) {
                return false;
            }
            let removed = slots.send.take();
            slots.arbiter.reset();
            self.ownership.remove(plugin, &self.guild_id, SlotKind::Send);
            removed
        };

        if let Some(registration) = removed {
            self.finish_send_release(registration, reason);
        }
        true
    }

    fn finish_send_release(&self, registration: SendRegistration, reason: RemovalReason) {
        registration.handler.detach();
        let cleared = registration.handler.clear_all();
        info!(
            "[{}] Send handler of {} removed ({:?}, {} queued frames dropped)",
            self.guild_id, registration.owner, reason, cleared
        );
        self.events.dispatch(&VoiceEvent::SendHandlerRemoved {
            guild_id: self.guild_id.clone(),
            plugin_id: registration.owner,
            reason,
        });
    }

    pub fn send_owner(&self) -> Option<PluginId> {
        self.slots.lock().send.as_ref().map(|r| r.owner.clone())
    }

    pub fn send_handler(&self) -> Option<SendHandler> {
        self.slots.lock().send.as_ref().map(|r| r.handler.clone())
    }

    /// Cancels any running fade.
    pub fn set_volume(&self, plugin: &PluginId, volume: i32) -> VoiceResult<bool> {
        let volume = check_percent("volume", volume)?;

        let event = {
            let mut slots = self.slots.lock();
            let Slots { send, arbiter, .. } = &mut *slots;
            let Some(registration) = send.as_mut().filter(|r| &r.owner == plugin) else {
                return Ok(false);
            };

            let old_volume = registration.volume;
            registration.volume = volume;
            registration.fade = None;
            registration.effective_volume =
                arbiter.duck(volume, registration.priority, arbiter.last_max_priority());

            VoiceEvent::VolumeChanged {
                guild_id: self.guild_id.clone(),
                plugin_id: plugin.clone(),
                old_volume,
                new_volume: volume,
                is_fading: false,
            }
        };

        self.events.dispatch(&event);
        Ok(true)
    }

    /// Ramps the registration volume linearly to `target` over `duration`,
    /// advanced by ticks.
    pub fn fade_volume(
        &self,
        plugin: &PluginId,
        target: i32,
        duration: Duration,
    ) -> VoiceResult<bool> {
        if duration.is_zero() {
            return self.set_volume(plugin, target);
        }
        let target = check_percent("volume", target)?;

        let event = {
            let mut slots = self.slots.lock();
            let Some(registration) = slots.send.as_mut().filter(|r| &r.owner == plugin) else {
                return Ok(false);
            };

            registration.fade = Some(VolumeFade::new(
                registration.volume,
                target,
                Instant::now(),
                duration,
            ));

            VoiceEvent::VolumeChanged {
                guild_id: self.guild_id.clone(),
                plugin_id: plugin.clone(),
                old_volume: registration.volume,
                new_volume: target,
                is_fading: true,
            }
        };

        debug!(
            "[{}] Fading volume of {} over {:?}",
            self.guild_id, plugin, duration
        );
        self.events.dispatch(&event);
        Ok(true)
    }

    pub fn volume(&self, plugin: &PluginId) -> Option<u8> {
        self.slots
            .lock()
            .send
            .as_ref()
            .filter(|r| &r.owner == plugin)
            .map(|r| r.volume)
    }

    pub fn effective_volume(&self, plugin: &PluginId) -> Option<u8> {
        self.slots
            .lock()
            .send
            .as_ref()
            .filter(|r| &r.owner == plugin)
            .map(|r| r.effective_volume)
    }

    pub fn priority_threshold(&self) -> u8 {
        self.slots.lock().arbiter.threshold()
    }

    /// Takes effect on the next tick.
    pub fn set_priority_threshold(&self, threshold: i32) -> VoiceResult<bool> {
        Ok(self.try_set_priority_threshold(threshold)?.unwrap_or(false))
    }

    pub(crate) fn try_set_priority_threshold(&self, threshold: i32) -> VoiceResult<Option<bool>> {
        let threshold = check_percent("threshold", threshold)?;

        let old_threshold = {
            let mut slots = self.slots.lock();
            if slots.retired {
                return Ok(None);
            }
            let old = slots.arbiter.threshold();
            slots.arbiter.set_threshold(threshold);
            old
        };

        if old_threshold != threshold {
            self.events.dispatch(&VoiceEvent::PriorityThresholdChanged {
                guild_id: self.guild_id.clone(),
                old_threshold,
                new_threshold: threshold,
            });
        }
        Ok(Some(true))
    }

    fn overflow_notifier(&self) -> OverflowNotifier {
        OverflowNotifier {
            guild_id: self.guild_id.clone(),
            events: self.events.clone(),
        }
    }

    // ─── Receive slot ────────────────────────────────────────────────────────

    pub fn register_receive_handler(&self, plugin: &PluginId, handler: ReceiveHandler) -> bool {
        self.try_register_receive_handler(plugin, handler)
            .unwrap_or(false)
    }

    /// `None` when the session has been retired.
    pub(crate) fn try_register_receive_handler(
        &self,
        plugin: &PluginId,
        handler: ReceiveHandler,
    ) -> Option<bool> {
        let multi_user = handler.is_multi_user();
        {
            let mut slots = self.slots.lock();
            if slots.retired {
                return None;
            }
            if slots.receive.is_some() {
                return Some(false);
            }
            slots.receive = Some(ReceiveRegistration {
                owner: plugin.clone(),
                handler,
            });
            self.ownership
                .insert(plugin, &self.guild_id, SlotKind::Receive);
        }

        info!(
            "[{}] Receive handler registered by {}",
            self.guild_id, plugin
        );
        self.events.dispatch(&VoiceEvent::ReceiveHandlerRegistered {
            guild_id: self.guild_id.clone(),
            plugin_id: plugin.clone(),
            multi_user,
        });
        Some(true)
    }

    pub fn deregister_receive_handler(&self, plugin: &PluginId) -> bool {
        self.release_receive(plugin, RemovalReason::Deregistered)
    }

    fn release_receive(&self, plugin: &PluginId, reason: RemovalReason) -> bool {
        {
            let mut slots = self.slots.lock();
            if slots.receive.as_ref().is_none_or(|r| &r.owner != plugin) {
                return false;
            }
            slots.receive = None;
            self.ownership
                .remove(plugin, &self.guild_id, SlotKind::Receive);
        }
        self.finish_receive_release(plugin.clone(), reason);
        true
    }

    fn finish_receive_release(&self, owner: PluginId, reason: RemovalReason) {
        info!(
            "[{}] Receive handler of {} removed ({:?})",
            self.guild_id, owner, reason
        );
        self.events.dispatch(&VoiceEvent::ReceiveHandlerRemoved {
            guild_id: self.guild_id.clone(),
            plugin_id: owner,
            reason,
        });
    }

    pub fn receive_owner(&self) -> Option<PluginId> {
        self.slots.lock().receive.as_ref().map(|r| r.owner.clone())
    }

    pub fn receive_handler(&self) -> Option<ReceiveHandler> {
        self.slots.lock().receive.as_ref().map(|r| r.handler.clone())
    }

    /// Transport entry point. `volume` is a linear factor, 1.0 leaves the
    /// frame untouched.
    pub fn handle_combined_audio(&self, frame: &Bytes, volume: f32) {
        let Some(handler) = self.receive_handler() else {
            return;
        };
        if handler.can_receive_combined() {
            handler.handle_combined_audio(&pcm::scale(frame, volume));
        }
    }

    pub fn handle_user_audio(&self, user_id: UserId, frame: &Bytes, volume: f32) {
        let Some(handler) = self.receive_handler() else {
            return;
        };
        if handler.can_receive_user() {
            handler.handle_user_audio(user_id, &pcm::scale(frame, volume));
        }
    }

    // ─── Teardown ────────────────────────────────────────────────────────────

    /// Releases one slot if `plugin` owns it.
    pub(crate) fn release_slot(
        &self,
        plugin: &PluginId,
        slot: SlotKind,
        reason: RemovalReason,
    ) -> bool {
        match slot {
            SlotKind::Send => self.release_send(plugin, reason),
            SlotKind::Receive => self.release_receive(plugin, reason),
        }
    }

    /// Releases both slots regardless of owner.
    pub(crate) fn release_all(&self, reason: RemovalReason) {
        let (send, receive) = {
            let mut slots = self.slots.lock();
            let send = slots.send.take();
            let receive = slots.receive.take();
            slots.arbiter.reset();
            if let Some(r) = &send {
                self.ownership.remove(&r.owner, &self.guild_id, SlotKind::Send);
            }
            if let Some(r) = &receive {
                self.ownership
                    .remove(&r.owner, &self.guild_id, SlotKind::Receive);
            }
            (send, receive)
        };

        if let Some(registration) = send {
            self.finish_send_release(registration, reason);
        }
        if let Some(registration) = receive {
            self.finish_receive_release(registration.owner, reason);
        }
    }

    // ─── Connection lifecycle ────────────────────────────────────────────────

    /// Returns `true` once connected to `channel_id`. A cancelled pre-join
    /// or a transport failure leaves the previous state in place.
    pub async fn join(&self, channel_id: ChannelId) -> bool {
        self.try_join(channel_id).await.unwrap_or(false)
    }

    /// `None` when the session has been retired.
    pub(crate) async fn try_join(&self, channel_id: ChannelId) -> Option<bool> {
        let _lifecycle = self.lifecycle.lock().await;

        let previous = *self.connection.lock();
        if previous == Connection::connected(channel_id) {
            return Some(true);
        }
        if self.is_retired() {
            return None;
        }

        let pre = self.events.dispatch(&VoiceEvent::PreJoin {
            guild_id: self.guild_id.clone(),
            channel_id,
        });
        if pre.cancelled {
            info!("[{}] Join to {} cancelled by a listener", self.guild_id, channel_id);
            return Some(false);
        }

        {
            // Leaving Disconnected makes the session non-idle, so this has to
            // be ordered against retirement.
            let slots = self.slots.lock();
            if slots.retired {
                return None;
            }
            self.set_connection(Connection::transitional(ConnectionState::Connecting));
        }
        let success = match self
            .transport
            .open_connection(&self.guild_id, channel_id)
            .await
        {
            Ok(()) => {
                self.set_connection(Connection::connected(channel_id));
                info!("[{}] Connected to channel {}", self.guild_id, channel_id);
                true
            }
            Err(e) => {
                self.set_connection(previous);
                warn!("[{}] Join to {} failed: {}", self.guild_id, channel_id, e);
                false
            }
        };

        self.events.dispatch(&VoiceEvent::Join {
            guild_id: self.guild_id.clone(),
            channel_id,
            success,
        });
        Some(success)
    }

    /// Leaves the current channel and releases both slots. Only valid while
    /// connected.
    pub async fn leave(&self) -> bool {
        let _lifecycle = self.lifecycle.lock().await;

        let previous = *self.connection.lock();
        if previous.state != ConnectionState::Connected {
            debug!("[{}] Leave ignored, state is {}", self.guild_id, previous.state);
            return false;
        }

        let pre = self.events.dispatch(&VoiceEvent::PreLeave {
            guild_id: self.guild_id.clone(),
            channel_id: previous.channel,
        });
        if pre.cancelled {
            info!("[{}] Leave cancelled by a listener", self.guild_id);
            return false;
        }

        self.set_connection(Connection::transitional(ConnectionState::Disconnecting));
        let success = match self.transport.close_connection(&self.guild_id).await {
            Ok(()) => {
                self.set_connection(Connection::DISCONNECTED);
                self.release_all(RemovalReason::Left);
                info!("[{}] Left voice", self.guild_id);
                true
            }
            Err(e) => {
                self.set_connection(previous);
                warn!("[{}] Leave failed: {}", self.guild_id, e);
                false
            }
        };

        self.events.dispatch(&VoiceEvent::Leave {
            guild_id: self.guild_id.clone(),
            channel_id: previous.channel,
            success,
        });
        success
    }

    /// Forced teardown: disconnects without a pre-leave veto and releases
    /// everything. Transport errors are logged, the session ends up
    /// disconnected either way.
    pub(crate) async fn teardown(&self, reason: RemovalReason) {
        let _lifecycle = self.lifecycle.lock().await;

        let previous = *self.connection.lock();
        if previous.state == ConnectionState::Connected {
            self.set_connection(Connection::transitional(ConnectionState::Disconnecting));
            let success = match self.transport.close_connection(&self.guild_id).await {
                Ok(()) => true,
                Err(e) => {
                    warn!("[{}] Disconnect during teardown failed: {}", self.guild_id, e);
                    false
                }
            };
            self.set_connection(Connection::DISCONNECTED);
            self.events.dispatch(&VoiceEvent::Leave {
                guild_id: self.guild_id.clone(),
                channel_id: previous.channel,
                success,
            });
        }

        self.release_all(reason);
    }

    // ─── Tick ────────────────────────────────────────────────────────────────

    /// Produces the guild's frame for the tick at `now`. Queues are left
    /// untouched while not connected.
    pub(crate) fn tick_at(&self, now: Instant) -> Option<Frame> {
        if self.connection_state() != ConnectionState::Connected {
            return None;
        }

        let mut events = Vec::new();
        let outcome = {
            let mut slots = self.slots.lock();
            let Slots { send, arbiter, .. } = &mut *slots;
            let registration = send.as_mut()?;

            if let Some(fade) = registration.fade {
                let old_volume = registration.volume;
                registration.volume = fade.value_at(now);
                if fade.is_complete(now) {
                    registration.fade = None;
                    events.push(VoiceEvent::VolumeChanged {
                        guild_id: self.guild_id.clone(),
                        plugin_id: registration.owner.clone(),
                        old_volume,
                        new_volume: registration.volume,
                        is_fading: false,
                    });
                }
            }

            let outcome = registration.handler.tick(
                arbiter,
                &TickContext {
                    owner_key: &registration.owner.0,
                    volume: registration.volume,
                    priority: registration.priority,
                },
            );
            registration.effective_volume = arbiter.duck(
                registration.volume,
                registration.priority,
                outcome.max_active_priority,
            );
            outcome
        };

        if outcome.mix.frame.is_some() {
            self.frames_sent.fetch_add(1, Ordering::Relaxed);
            if self.events.has_listeners(EventKind::FrameMixed) {
                events.push(VoiceEvent::FrameMixed {
                    guild_id: self.guild_id.clone(),
                    active_sources: outcome.mix.report.active_sources,
                    bypassed: outcome.mix.report.bypassed,
                    has_audio: outcome.mix.report.has_audio,
                });
            }
        } else {
            self.frames_nulled.fetch_add(1, Ordering::Relaxed);
        }

        self.events.dispatch_all(events);
        outcome.mix.frame
    }
}

impl AudioSendHandler for AudioSession {
    fn can_provide(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
            && self
                .slots
                .lock()
                .send
                .as_ref()
                .is_some_and(|r| r.handler.can_provide())
    }

    fn provide_20ms_audio(&self) -> Option<Frame> {
        self.tick_at(Instant::now())
    }
}
