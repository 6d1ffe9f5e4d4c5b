//! Push channel message envelope
//!
//! Every frame on the room socket is a JSON object with a `type` tag. Apart
//! from chat and presence, these messages only mean "something changed";
//! their payload fields are informational.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::{ChatMessage, RoomTask, TimerStatus, User};

/// Tagged push message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    #[serde(rename_all = "camelCase")]
    UserJoined {
        #[serde(default)]
        user_id: Option<String>,
        #[serde(default)]
        user_name: Option<String>,
        /// What the user said they are working on
        #[serde(default)]
        task: Option<String>,
        #[serde(default)]
        timestamp: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    UserLeft {
        #[serde(default)]
        user_id: Option<String>,
        #[serde(default)]
        user_name: Option<String>,
        #[serde(default)]
        timestamp: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    MemberApproved {
        user_id: String,
        #[serde(default)]
        room_name: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    RoomUpdate {
        #[serde(default)]
        trigger: Option<String>,
        /// Affected user, if any
        #[serde(
            default,
            alias = "kickedUserId",
            alias = "blockedUserId",
            skip_serializing_if = "Option::is_none"
        )]
        user_id: Option<String>,
    },
    /// `timer_start` is the legacy client-initiated form of the same event.
    #[serde(rename_all = "camelCase", alias = "timer_start")]
    TimerUpdate {
        #[serde(default)]
        status: Option<TimerStatus>,
        #[serde(default)]
        start_time: Option<String>,
        #[serde(default)]
        duration: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    TaskUpdated {
        #[serde(default)]
        task_id: Option<String>,
        #[serde(default)]
        updates: Option<serde_json::Value>,
    },
    NewTask {
        #[serde(default)]
        task: Option<RoomTask>,
    },
    #[serde(rename_all = "camelCase")]
    ChatMessage {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        user_id: String,
        #[serde(default)]
        user_name: String,
        #[serde(default)]
        content: String,
        #[serde(default)]
        timestamp: Option<String>,
    },
    /// Any tag this client does not know about.
    #[serde(other)]
    Unknown,
}

/// Why the viewer was removed from a room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalKind {
    Kicked,
    Blocked,
}

impl RemovalKind {
    fn from_trigger(trigger: &str) -> Option<Self> {
        match trigger {
            "kick" | "kicked" => Some(RemovalKind::Kicked),
            "block" | "blocked" => Some(RemovalKind::Blocked),
            _ => None,
        }
    }

    pub fn notice(self) -> &'static str {
        match self {
            RemovalKind::Kicked => "You were removed from the room by the owner",
            RemovalKind::Blocked => "You were blocked from this room by the owner",
        }
    }
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl PushMessage {
    /// Outbound chat line with a fresh client-side id.
    pub fn chat(user: &User, content: &str) -> Self {
        PushMessage::ChatMessage {
            id: Some(uuid::Uuid::new_v4().to_string()),
            user_id: user.id.clone(),
            user_name: user.name.clone(),
            content: content.to_string(),
            timestamp: Some(now_iso()),
        }
    }

    pub fn joined(user: &User, focus: Option<&str>) -> Self {
        PushMessage::UserJoined {
            user_id: Some(user.id.clone()),
            user_name: Some(user.name.clone()),
            task: Some(focus.unwrap_or("Silent focus").to_string()),
            timestamp: Some(now_iso()),
        }
    }

    pub fn left(user: &User) -> Self {
        PushMessage::UserLeft {
            user_id: Some(user.id.clone()),
            user_name: Some(user.name.clone()),
            timestamp: Some(now_iso()),
        }
    }

    /// The wire tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            PushMessage::UserJoined { .. } => "user_joined",
            PushMessage::UserLeft { .. } => "user_left",
            PushMessage::MemberApproved { .. } => "member_approved",
            PushMessage::RoomUpdate { .. } => "room_update",
            PushMessage::TimerUpdate { .. } => "timer_update",
            PushMessage::TaskUpdated { .. } => "task_updated",
            PushMessage::NewTask { .. } => "new_task",
            PushMessage::ChatMessage { .. } => "chat_message",
            PushMessage::Unknown => "unknown",
        }
    }

    /// For a kick/block `room_update`, the removal kind and the removed user.
    pub fn removal(&self) -> Option<(RemovalKind, &str)> {
        match self {
            PushMessage::RoomUpdate {
                trigger: Some(trigger),
                user_id: Some(user_id),
            } => RemovalKind::from_trigger(trigger).map(|kind| (kind, user_id.as_str())),
            _ => None,
        }
    }

    /// Messages whose arrival means the cached snapshot is out of date.
    pub fn invalidates_snapshot(&self) -> bool {
        matches!(
            self,
            PushMessage::RoomUpdate { .. }
                | PushMessage::TimerUpdate { .. }
                | PushMessage::TaskUpdated { .. }
                | PushMessage::NewTask { .. }
                | PushMessage::MemberApproved { .. }
        )
    }

    /// Chat payload as a transcript entry.
    pub fn as_chat(&self) -> Option<ChatMessage> {
        match self {
            PushMessage::ChatMessage {
                id,
                user_id,
                user_name,
                content,
                timestamp,
            } => Some(ChatMessage {
                id: id.clone().unwrap_or_default(),
                user_id: user_id.clone(),
                user_name: user_name.clone(),
                content: content.clone(),
                timestamp: timestamp.clone(),
            }),
            _ => None,
        }
    }
}

/// Parse one inbound text frame. Returns `None` for anything that is not a
/// JSON object with a `type` tag.
pub fn parse_push_frame(frame: &str) -> Option<PushMessage> {
    match serde_json::from_str::<PushMessage>(frame) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::warn!("Dropping malformed push frame: {} ({})", frame, e);
            None
        }
    }
}
