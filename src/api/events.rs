use serde::Serialize;

use crate::common::types::{ChannelId, GuildId, PluginId};

/// Notifications emitted by the engine.
///
/// `PreJoin` and `PreLeave` are the only cancellable events; every other
/// variant is fire-and-forget.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum VoiceEvent {
    #[serde(rename = "PreJoinEvent")]
    #[serde(rename_all = "camelCase")]
    PreJoin {
        guild_id: GuildId,
        channel_id: ChannelId,
    },

    #[serde(rename = "JoinEvent")]
    #[serde(rename_all = "camelCase")]
    Join {
        guild_id: GuildId,
        channel_id: ChannelId,
        success: bool,
    },

    #[serde(rename = "PreLeaveEvent")]
    #[serde(rename_all = "camelCase")]
    PreLeave {
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
    },

    #[serde(rename = "LeaveEvent")]
    #[serde(rename_all = "camelCase")]
    Leave {
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
        success: bool,
    },

    #[serde(rename = "SendHandlerRegisteredEvent")]
    #[serde(rename_all = "camelCase")]
    SendHandlerRegistered {
        guild_id: GuildId,
        plugin_id: PluginId,
        registration_id: uuid::Uuid,
        mixing: bool,
        volume: u8,
        priority: u8,
    },

    #[serde(rename = "SendHandlerRemovedEvent")]
    #[serde(rename_all = "camelCase")]
    SendHandlerRemoved {
        guild_id: GuildId,
        plugin_id: PluginId,
        reason: RemovalReason,
    },

    #[serde(rename = "ReceiveHandlerRegisteredEvent")]
    #[serde(rename_all = "camelCase")]
    ReceiveHandlerRegistered {
        guild_id: GuildId,
        plugin_id: PluginId,
        multi_user: bool,
    },

    #[serde(rename = "ReceiveHandlerRemovedEvent")]
    #[serde(rename_all = "camelCase")]
    ReceiveHandlerRemoved {
        guild_id: GuildId,
        plugin_id: PluginId,
        reason: RemovalReason,
    },

    #[serde(rename = "VolumeChangedEvent")]
    #[serde(rename_all = "camelCase")]
    VolumeChanged {
        guild_id: GuildId,
        plugin_id: PluginId,
        old_volume: u8,
        new_volume: u8,
        is_fading: bool,
    },

    #[serde(rename = "PriorityThresholdChangedEvent")]
    #[serde(rename_all = "camelCase")]
    PriorityThresholdChanged {
        guild_id: GuildId,
        old_threshold: u8,
        new_threshold: u8,
    },

    #[serde(rename = "AudioFrameMixedEvent")]
    #[serde(rename_all = "camelCase")]
    FrameMixed {
        guild_id: GuildId,
        active_sources: usize,
        bypassed: bool,
        has_audio: bool,
    },

    #[serde(rename = "QueueOverflowEvent")]
    #[serde(rename_all = "camelCase")]
    QueueOverflow {
        guild_id: GuildId,
        source_id: Option<String>,
        dropped: u64,
    },
}

/// Why a send or receive registration went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RemovalReason {
    Deregistered,
    Left,
    PluginDisabled,
    Shutdown,
}

/// Discriminant of [`VoiceEvent`], used as the listener registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PreJoin,
    Join,
    PreLeave,
    Leave,
    SendHandlerRegistered,
    SendHandlerRemoved,
    ReceiveHandlerRegistered,
    ReceiveHandlerRemoved,
    VolumeChanged,
    PriorityThresholdChanged,
    FrameMixed,
    QueueOverflow,
}

impl EventKind {
    pub const ALL: [EventKind; 12] = [
        EventKind::PreJoin,
        EventKind::Join,
        EventKind::PreLeave,
        EventKind::Leave,
        EventKind::SendHandlerRegistered,
        EventKind::SendHandlerRemoved,
        EventKind::ReceiveHandlerRegistered,
        EventKind::ReceiveHandlerRemoved,
        EventKind::VolumeChanged,
        EventKind::PriorityThresholdChanged,
        EventKind::FrameMixed,
        EventKind::QueueOverflow,
    ];
}

impl VoiceEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::PreJoin { .. } => EventKind::PreJoin,
            Self::Join { .. } => EventKind::Join,
            Self::PreLeave { .. } => EventKind::PreLeave,
            Self::Leave { .. } => EventKind::Leave,
            Self::SendHandlerRegistered { .. } => EventKind::SendHandlerRegistered,
            Self::SendHandlerRemoved { .. } => EventKind::SendHandlerRemoved,
            Self::ReceiveHandlerRegistered { .. } => EventKind::ReceiveHandlerRegistered,
            Self::ReceiveHandlerRemoved { .. } => EventKind::ReceiveHandlerRemoved,
            Self::VolumeChanged { .. } => EventKind::VolumeChanged,
            Self::PriorityThresholdChanged { .. } => EventKind::PriorityThresholdChanged,
            Self::FrameMixed { .. } => EventKind::FrameMixed,
            Self::QueueOverflow { .. } => EventKind::QueueOverflow,
        }
    }

    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::PreJoin { .. } | Self::PreLeave { .. })
    }

    pub fn guild_id(&self) -> &GuildId {
        match self {
            Self::PreJoin { guild_id, .. }
            | Self::Join { guild_id, .. }
            | Self::PreLeave { guild_id, .. }
            | Self::Leave { guild_id, .. }
            | Self::SendHandlerRegistered { guild_id, .. }
            | Self::SendHandlerRemoved { guild_id, .. }
            | Self::ReceiveHandlerRegistered { guild_id, .. }
            | Self::ReceiveHandlerRemoved { guild_id, .. }
            | Self::VolumeChanged { guild_id, .. }
            | Self::PriorityThresholdChanged { guild_id, .. }
            | Self::FrameMixed { guild_id, .. }
            | Self::QueueOverflow { guild_id, .. } => guild_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_with_type_tag() {
        let event = VoiceEvent::VolumeChanged {
            guild_id: "42".into(),
            plugin_id: "music".into(),
            old_volume: 100,
            new_volume: 40,
            is_fading: true,
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "VolumeChangedEvent");
        assert_eq!(json["guildId"], "42");
        assert_eq!(json["pluginId"], "music");
        assert_eq!(json["newVolume"], 40);
        assert_eq!(json["isFading"], true);
    }

    #[test]
    fn test_only_pre_events_are_cancellable() {
        let pre = VoiceEvent::PreJoin {
            guild_id: "1".into(),
            channel_id: ChannelId(5),
        };
        let post = VoiceEvent::Join {
            guild_id: "1".into(),
            channel_id: ChannelId(5),
            success: true,
        };
        assert!(pre.is_cancellable());
        assert!(!post.is_cancellable());
        assert_eq!(pre.kind(), EventKind::PreJoin);
        assert_eq!(post.guild_id().0, "1");
    }
}
