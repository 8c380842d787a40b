//! `AudioSessionRegistry`: the plugin-facing entry point.
//!
//! Owns every [`AudioSession`], the shared [`EventBus`] and the reverse
//! ownership index used for plugin teardown. Sessions are created lazily on
//! first use and removed once they are left or torn down with nothing
//! registered and no guild configuration of their own.
//!
//! Removal retires the session under its slot lock. A write racing with it
//! sees the retired session, and [`AudioSessionRegistry::write_live`] retries
//! it on the guild's replacement.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use dashmap::DashMap;
use tracing::{debug, info};

use super::{
    receive::ReceiveHandler,
    send::{AudioSendHandler, BasicSendHandler, MixingSendHandler, SendHandler},
    session::{AudioSession, ConnectionState, OwnershipIndex},
    transport::VoiceTransport,
};
use crate::{
    api::{EventBus, RemovalReason},
    audio::Frame,
    common::{
        errors::{VoiceResult, check_percent},
        types::{ChannelId, GuildId, PluginId, SlotKind, UserId},
    },
    configs::EngineConfig,
};

pub struct AudioSessionRegistry {
    sessions: DashMap<GuildId, Arc<AudioSession>>,
    ownership: Arc<OwnershipIndex>,
    events: Arc<EventBus>,
    transport: Arc<dyn VoiceTransport>,
    config: EngineConfig,
}

impl AudioSessionRegistry {
    pub fn new(transport: Arc<dyn VoiceTransport>, config: EngineConfig) -> Self {
        Self::with_events(Arc::new(EventBus::new()), transport, config)
    }

    pub fn with_events(
        events: Arc<EventBus>,
        transport: Arc<dyn VoiceTransport>,
        config: EngineConfig,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            ownership: Arc::new(OwnershipIndex::default()),
            events,
            transport,
            config,
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A single-queue handler sized from the engine config.
    pub fn basic_send_handler(&self) -> Arc<BasicSendHandler> {
        Arc::new(BasicSendHandler::new(self.config.single_queue_capacity))
    }

    /// A mixing handler whose source queues are sized from the engine config.
    pub fn mixing_send_handler(&self) -> Arc<MixingSendHandler> {
        Arc::new(MixingSendHandler::new(self.config.source_queue_capacity))
    }

    // ─── Sessions ────────────────────────────────────────────────────────────

    pub fn session(&self, guild_id: &GuildId) -> Option<Arc<AudioSession>> {
        self.sessions.get(guild_id).map(|s| s.value().clone())
    }

    fn session_or_create(&self, guild_id: &GuildId) -> Arc<AudioSession> {
        self.sessions
            .entry(guild_id.clone())
            .or_insert_with(|| {
                info!("[{}] Creating audio session", guild_id);
                Arc::new(AudioSession::new(
                    guild_id.clone(),
                    self.events.clone(),
                    self.transport.clone(),
                    self.ownership.clone(),
                    &self.config,
                ))
            })
            .value()
            .clone()
    }

    /// Runs `write` against the guild's session, creating it if needed.
    /// `write` returns `None` when it found the session retired.
    fn write_live<T>(
        &self,
        guild_id: &GuildId,
        mut write: impl FnMut(&AudioSession) -> Option<T>,
    ) -> T {
        loop {
            let session = self.session_or_create(guild_id);
            if let Some(out) = write(session.as_ref()) {
                return out;
            }
            debug!("[{}] Session retired during write, retrying", guild_id);
        }
    }

    /// Drops the session if nothing is left in it.
    fn prune(&self, guild_id: &GuildId) {
        if self
            .sessions
            .remove_if(guild_id, |_, session| session.retire_if_idle())
            .is_some()
        {
            info!("[{}] Audio session removed", guild_id);
        }
    }

    pub fn guilds(&self) -> Vec<GuildId> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    // ─── Send slot ───────────────────────────────────────────────────────────

    pub fn register_send_handler(
        &self,
        guild_id: &GuildId,
        plugin: &PluginId,
        handler: impl Into<SendHandler>,
        volume: i32,
        priority: i32,
    ) -> VoiceResult<bool> {
        // Validate before a session is created for an invalid call.
        check_percent("volume", volume)?;
        check_percent("priority", priority)?;
        let handler = handler.into();
        self.write_live(guild_id, |session| {
            session
                .try_register_send_handler(plugin, handler.clone(), volume, priority)
                .transpose()
        })
    }

    pub fn deregister_send_handler(&self, guild_id: &GuildId, plugin: &PluginId) -> bool {
        let Some(session) = self.session(guild_id) else {
            return false;
        };
        let removed = session.deregister_send_handler(plugin);
        if removed {
            self.prune(guild_id);
        }
        removed
    }

    pub fn set_volume(&self, guild_id: &GuildId, plugin: &PluginId, volume: i32) -> VoiceResult<bool> {
        check_percent("volume", volume)?;
        match self.session(guild_id) {
            Some(session) => session.set_volume(plugin, volume),
            None => Ok(false),
        }
    }

    pub fn fade_volume(
        &self,
        guild_id: &GuildId,
        plugin: &PluginId,
        target: i32,
        duration: Duration,
    ) -> VoiceResult<bool> {
        check_percent("volume", target)?;
        match self.session(guild_id) {
            Some(session) => session.fade_volume(plugin, target, duration),
            None => Ok(false),
        }
    }

    pub fn get_volume(&self, guild_id: &GuildId, plugin: &PluginId) -> Option<u8> {
        self.session(guild_id)?.volume(plugin)
    }

    pub fn get_effective_volume(&self, guild_id: &GuildId, plugin: &PluginId) -> Option<u8> {
        self.session(guild_id)?.effective_volume(plugin)
    }

    /// Creates the session if needed. A session with a non-default
    /// threshold is kept after its last registration goes; setting the
    /// default back lets it be pruned.
    pub fn set_priority_threshold(&self, guild_id: &GuildId, threshold: i32) -> VoiceResult<bool> {
        check_percent("threshold", threshold)?;
        let changed = self.write_live(guild_id, |session| {
            session.try_set_priority_threshold(threshold).transpose()
        })?;
        self.prune(guild_id);
        Ok(changed)
    }

    pub fn get_priority_threshold(&self, guild_id: &GuildId) -> u8 {
        self.session(guild_id)
            .map_or(self.config.default_priority_threshold, |s| {
                s.priority_threshold()
            })
    }

    // ─── Receive slot ────────────────────────────────────────────────────────

    pub fn register_receive_handler(
        &self,
        guild_id: &GuildId,
        plugin: &PluginId,
        handler: impl Into<ReceiveHandler>,
    ) -> bool {
        let handler = handler.into();
        self.write_live(guild_id, |session| {
            session.try_register_receive_handler(plugin, handler.clone())
        })
    }

    pub fn deregister_receive_handler(&self, guild_id: &GuildId, plugin: &PluginId) -> bool {
        let Some(session) = self.session(guild_id) else {
            return false;
        };
        let removed = session.deregister_receive_handler(plugin);
        if removed {
            self.prune(guild_id);
        }
        removed
    }

    // ─── Transport entry points ──────────────────────────────────────────────

    pub fn provide_20ms_audio(&self, guild_id: &GuildId) -> Option<Frame> {
        self.session(guild_id)?.provide_20ms_audio()
    }

    pub fn handle_combined_audio(&self, guild_id: &GuildId, frame: &Bytes, volume: f32) {
        if let Some(session) = self.session(guild_id) {
            session.handle_combined_audio(frame, volume);
        }
    }

    pub fn handle_user_audio(&self, guild_id: &GuildId, user_id: UserId, frame: &Bytes, volume: f32) {
        if let Some(session) = self.session(guild_id) {
            session.handle_user_audio(user_id, frame, volume);
        }
    }

    // ─── Connection lifecycle ────────────────────────────────────────────────

    pub async fn join_voice_channel(&self, guild_id: &GuildId, channel_id: ChannelId) -> bool {
        let joined = loop {
            if let Some(joined) = self.session_or_create(guild_id).try_join(channel_id).await {
                break joined;
            }
            debug!("[{}] Session retired during join, retrying", guild_id);
        };
        if !joined {
            self.prune(guild_id);
        }
        joined
    }

    pub async fn leave_voice_channel(&self, guild_id: &GuildId) -> bool {
        let Some(session) = self.session(guild_id) else {
            return false;
        };
        let left = session.leave().await;
        if left {
            self.prune(guild_id);
        }
        left
    }

    pub fn connection_state(&self, guild_id: &GuildId) -> ConnectionState {
        self.session(guild_id)
            .map_or(ConnectionState::Disconnected, |s| s.connection_state())
    }

    pub fn connected_channel(&self, guild_id: &GuildId) -> Option<ChannelId> {
        self.session(guild_id)?.connected_channel()
    }

    // ─── Teardown ────────────────────────────────────────────────────────────

    /// Releases every slot `plugin` holds in any guild and drops its event
    /// listeners. Returns the number of slots released.
    pub fn close_all_connections_for_plugin(&self, plugin: &PluginId) -> usize {
        let owned = self.ownership.take(plugin);
        let mut released = 0;

        for (guild_id, slot) in owned {
            let Some(session) = self.session(&guild_id) else {
                continue;
            };
            if session.release_slot(plugin, slot, RemovalReason::PluginDisabled) {
                released += 1;
            }
            self.prune(&guild_id);
        }

        let listeners = self.events.unsubscribe_owner(plugin);
        info!(
            "Plugin {} torn down: {} slot(s) released, {} listener(s) removed",
            plugin, released, listeners
        );
        released
    }

    /// Slots `plugin` currently owns.
    pub fn owned_slots(&self, plugin: &PluginId) -> Vec<(GuildId, SlotKind)> {
        self.ownership.owned_by(plugin)
    }

    /// Disconnects and removes the guild's session.
    pub async fn destroy_session(&self, guild_id: &GuildId) -> bool {
        let removed = self.sessions.remove_if(guild_id, |_, session| {
            session.retire();
            true
        });
        let Some((_, session)) = removed else {
            return false;
        };
        session.teardown(RemovalReason::Shutdown).await;
        info!("[{}] Audio session destroyed", guild_id);
        true
    }

    pub async fn shutdown(&self) {
        let guilds = self.guilds();
        info!("Shutting down {} audio session(s)", guilds.len());
        for guild_id in guilds {
            self.destroy_session(&guild_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::{EventKind, EventPriority, VoiceEvent},
        audio::pcm::{encode, sample_at, tone},
        common::errors::VoiceError,
        voice::{ReceiveDispatcher, SourceProfile, transport::LoopbackTransport},
    };
    use parking_lot::Mutex;

    fn registry() -> (AudioSessionRegistry, Arc<LoopbackTransport>) {
        let transport = Arc::new(LoopbackTransport::new());
        (
            AudioSessionRegistry::new(transport.clone(), EngineConfig::default()),
            transport,
        )
    }

    fn ids() -> (GuildId, PluginId) {
        (GuildId::from("guild"), PluginId::from("plugin"))
    }

    #[tokio::test]
    async fn test_single_music_source_is_bypassed() {
        let (registry, _) = registry();
        let (guild, plugin) = ids();
        let handler = registry.mixing_send_handler();

        assert!(registry.join_voice_channel(&guild, ChannelId(1)).await);
        assert!(registry.register_send_handler(&guild, &plugin, handler.clone(), 100, 50).unwrap());

        assert!(handler.add_audio_source("music"));
        let frame = tone(440.0, 16_000, 0);
        handler.queue_audio("music", frame.clone());

        assert_eq!(registry.provide_20ms_audio(&guild), Some(frame));
        assert_eq!(registry.provide_20ms_audio(&guild), None);
    }

    #[test]
    fn test_deregistration_is_idempotent() {
        let (registry, _) = registry();
        let (guild, plugin) = ids();

        assert!(registry.register_send_handler(&guild, &plugin, registry.basic_send_handler(), 80, 40).unwrap());
        assert!(registry.deregister_send_handler(&guild, &plugin));
        assert!(!registry.deregister_send_handler(&guild, &plugin));
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn test_invalid_arguments_leave_state_unchanged() {
        let (registry, _) = registry();
        let (guild, plugin) = ids();

        assert_eq!(
            registry.register_send_handler(&guild, &plugin, registry.basic_send_handler(), 150, 40),
            Err(VoiceError::InvalidArgument {
                name: "volume",
                value: 150
            })
        );
        assert!(registry.set_priority_threshold(&guild, 101).is_err());
        assert_eq!(registry.session_count(), 0);

        registry
            .register_send_handler(&guild, &plugin, registry.basic_send_handler(), 60, 40)
            .unwrap();
        assert!(registry.set_volume(&guild, &plugin, -1).is_err());
        assert!(registry.fade_volume(&guild, &plugin, 101, Duration::from_secs(1)).is_err());
        assert_eq!(registry.get_volume(&guild, &plugin), Some(60));
    }

    #[test]
    fn test_registration_races_with_pruning() {
        let (registry, _) = registry();
        let guild = GuildId::from("guild");
        let churn = PluginId::from("a");
        let sender = PluginId::from("b");

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..2_000 {
                    registry.register_receive_handler(&guild, &churn, Arc::new(ReceiveDispatcher::new()));
                    registry.deregister_receive_handler(&guild, &churn);
                }
            });

            for _ in 0..2_000 {
                assert!(registry
                    .register_send_handler(&guild, &sender, registry.basic_send_handler(), 100, 50)
                    .unwrap());
                let session = registry.session(&guild).unwrap();
                assert!(!session.is_retired());
                assert_eq!(session.send_owner(), Some(sender.clone()));
                assert!(registry.deregister_send_handler(&guild, &sender));
            }
        });

        assert_eq!(registry.session_count(), 0);
        assert!(registry.owned_slots(&churn).is_empty());
        assert!(registry.owned_slots(&sender).is_empty());
    }

    #[test]
    fn test_threshold_outlives_registrations() {
        let (registry, _) = registry();
        let (guild, plugin) = ids();

        assert!(registry.set_priority_threshold(&guild, 50).unwrap());
        assert!(registry.register_send_handler(&guild, &plugin, registry.basic_send_handler(), 100, 50).unwrap());
        assert!(registry.deregister_send_handler(&guild, &plugin));

        assert_eq!(registry.get_priority_threshold(&guild), 50);
        assert_eq!(registry.session_count(), 1);

        // Back at the default there is nothing left worth keeping.
        registry.set_priority_threshold(&guild, 70).unwrap();
        assert_eq!(registry.session_count(), 0);
        assert_eq!(registry.get_priority_threshold(&guild), 70);
    }

    #[tokio::test]
    async fn test_destroyed_session_is_replaced_on_next_registration() {
        let (registry, _) = registry();
        let (guild, plugin) = ids();

        registry.join_voice_channel(&guild, ChannelId(1)).await;
        let old = registry.session(&guild).unwrap();
        assert!(registry.destroy_session(&guild).await);
        assert!(old.is_retired());

        assert!(registry.register_send_handler(&guild, &plugin, registry.basic_send_handler(), 100, 50).unwrap());
        let current = registry.session(&guild).unwrap();
        assert!(!Arc::ptr_eq(&old, &current));
        assert_eq!(current.send_owner(), Some(plugin.clone()));
        assert_eq!(old.send_owner(), None);
    }

    #[test]
    fn test_unknown_guild_is_a_no_op() {
        let (registry, _) = registry();
        let (guild, plugin) = ids();

        assert_eq!(registry.set_volume(&guild, &plugin, 50), Ok(false));
        assert!(!registry.deregister_receive_handler(&guild, &plugin));
        assert_eq!(registry.get_volume(&guild, &plugin), None);
        assert_eq!(registry.get_priority_threshold(&guild), 70);
        assert_eq!(registry.connection_state(&guild), ConnectionState::Disconnected);
        assert_eq!(registry.provide_20ms_audio(&guild), None);
    }

    #[tokio::test]
    async fn test_priority_ducking_end_to_end() {
        let (registry, _) = registry();
        let (guild, plugin) = ids();
        let handler = registry.mixing_send_handler();
        handler.add_audio_source_with("announce", SourceProfile::new(100, 80).unwrap());
        handler.add_audio_source_with("music", SourceProfile::new(100, 30).unwrap());

        registry.join_voice_channel(&guild, ChannelId(1)).await;
        registry
            .register_send_handler(&guild, &plugin, handler.clone(), 100, 50)
            .unwrap();

        handler.queue_audio("announce", encode(&[0, 0]));
        handler.queue_audio("music", encode(&[2000, 2000]));
        handler.queue_audio("music", encode(&[2000, 2000]));

        let ducked = registry.provide_20ms_audio(&guild).unwrap();
        assert_eq!(sample_at(&ducked, 0), 500);

        let restored = registry.provide_20ms_audio(&guild).unwrap();
        assert_eq!(restored, encode(&[2000, 2000]));

        // Music at priority 30 is no longer below the threshold.
        registry.set_priority_threshold(&guild, 20).unwrap();
        assert_eq!(registry.get_priority_threshold(&guild), 20);
        handler.queue_audio("announce", encode(&[0, 0]));
        handler.queue_audio("music", encode(&[2000, 2000]));
        let frame = registry.provide_20ms_audio(&guild).unwrap();
        assert_eq!(sample_at(&frame, 0), 2000);
    }

    #[tokio::test]
    async fn test_plugin_teardown_releases_everything() {
        let (registry, _) = registry();
        let plugin = PluginId::from("tts");
        let other = PluginId::from("music");
        let g1 = GuildId::from("1");
        let g2 = GuildId::from("2");

        let removed = Arc::new(Mutex::new(Vec::new()));
        {
            let removed = removed.clone();
            registry.events().subscribe(
                EventKind::SendHandlerRemoved,
                EventPriority::Monitor,
                None,
                move |ctx| removed.lock().push(ctx.event().clone()),
            );
        }
        registry
            .events()
            .subscribe(EventKind::PreJoin, EventPriority::Normal, Some(plugin.clone()), |_| {});

        let h1 = registry.basic_send_handler();
        h1.queue_audio(encode(&[1]));
        registry.register_send_handler(&g1, &plugin, h1.clone(), 100, 50).unwrap();
        registry.register_receive_handler(&g2, &plugin, Arc::new(ReceiveDispatcher::new()));
        registry
            .register_send_handler(&g2, &other, registry.basic_send_handler(), 100, 50)
            .unwrap();
        assert_eq!(registry.owned_slots(&plugin).len(), 2);

        assert_eq!(registry.close_all_connections_for_plugin(&plugin), 2);
        assert!(registry.owned_slots(&plugin).is_empty());
        assert_eq!(h1.queue_size(), 0);
        assert!(registry.session(&g1).is_none());
        assert_eq!(registry.session(&g2).unwrap().send_owner(), Some(other.clone()));
        assert!(registry.session(&g2).unwrap().receive_owner().is_none());
        assert!(!registry.events().has_listeners(EventKind::PreJoin));
        assert!(matches!(
            removed.lock()[0],
            VoiceEvent::SendHandlerRemoved { reason: RemovalReason::PluginDisabled, .. }
        ));

        assert_eq!(registry.close_all_connections_for_plugin(&plugin), 0);
    }

    #[tokio::test]
    async fn test_leave_removes_session() {
        let (registry, transport) = registry();
        let (guild, plugin) = ids();

        registry.join_voice_channel(&guild, ChannelId(9)).await;
        registry
            .register_send_handler(&guild, &plugin, registry.basic_send_handler(), 100, 50)
            .unwrap();
        assert_eq!(registry.connected_channel(&guild), Some(ChannelId(9)));

        assert!(registry.leave_voice_channel(&guild).await);
        assert!(registry.session(&guild).is_none());
        assert!(registry.owned_slots(&plugin).is_empty());
        assert_eq!(transport.closed(), vec![guild.clone()]);
        assert!(!registry.leave_voice_channel(&guild).await);
    }

    #[tokio::test]
    async fn test_failed_join_does_not_leave_an_empty_session() {
        let (registry, transport) = registry();
        let (guild, _) = ids();
        transport.fail_open(true);

        assert!(!registry.join_voice_channel(&guild, ChannelId(2)).await);
        assert_eq!(registry.session_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_destroys_all_sessions() {
        let (registry, transport) = registry();
        let (_, plugin) = ids();
        for g in ["a", "b"] {
            let guild = GuildId::from(g);
            registry.join_voice_channel(&guild, ChannelId(1)).await;
            registry
                .register_send_handler(&guild, &plugin, registry.basic_send_handler(), 100, 50)
                .unwrap();
        }
        // Shutdown is not vetoable.
        registry
            .events()
            .subscribe(EventKind::PreLeave, EventPriority::Normal, None, |ctx| ctx.cancel());

        registry.shutdown().await;
        assert_eq!(registry.session_count(), 0);
        assert_eq!(transport.closed().len(), 2);
        assert!(registry.owned_slots(&plugin).is_empty());
        assert!(!registry.destroy_session(&GuildId::from("a")).await);
    }

    #[test]
    fn test_receive_routing() {
        let (registry, _) = registry();
        let (guild, plugin) = ids();
        let dispatcher = Arc::new(ReceiveDispatcher::new());
        let combined = Arc::new(Mutex::new(0usize));
        {
            let combined = combined.clone();
            dispatcher.set_combined_callback(Some(Arc::new(move |_: &[u8]| *combined.lock() += 1)));
        }

        assert!(registry.register_receive_handler(&guild, &plugin, dispatcher.clone()));
        registry.handle_combined_audio(&guild, &encode(&[1, 2]), 1.0);
        registry.handle_user_audio(&guild, UserId(42), &encode(&[1, 2]), 1.0);
        registry.handle_user_audio(&GuildId::from("elsewhere"), UserId(43), &encode(&[1]), 1.0);

        assert_eq!(*combined.lock(), 1);
        assert_eq!(dispatcher.get_speaking_users().len(), 1);
        assert!(registry.deregister_receive_handler(&guild, &plugin));
        assert!(!registry.deregister_receive_handler(&guild, &plugin));
    }
}
