//! Focus room models

use serde::{Deserialize, Serialize};

use super::{null_as_default, RoomTask};

/// Timer length used when a room has never configured one.
pub const DEFAULT_TIMER_MINUTES: u32 = 25;

/// Shared timer state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerStatus {
    Running,
    Paused,
    #[default]
    Stopped,
}

impl TimerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TimerStatus::Running => "running",
            TimerStatus::Paused => "paused",
            TimerStatus::Stopped => "stopped",
        }
    }
}

/// Role recorded on a member entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    #[default]
    Pending,
    Member,
    Admin,
}

/// Room member, ordered by join time in the snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMember {
    pub user_id: String,
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: MemberRole,
    #[serde(default)]
    pub joined_at: Option<String>,
}

/// Join request awaiting owner approval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRequest {
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub joined_at: Option<String>,
}

/// Persisted chat line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Client-generated id, used for de-duplication
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Client-side view of one room (`GET /api/rooms/{roomId}`).
///
/// The room listing returns the same shape, so summaries reuse this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub owner_name: Option<String>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub active_users: Vec<serde_json::Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub members: Vec<RoomMember>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub pending_requests: Vec<PendingRequest>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub blocked_users: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tasks: Vec<RoomTask>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub chat_history: Vec<ChatMessage>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub timer_start_time: Option<String>,
    #[serde(default)]
    pub timer_duration: Option<u32>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub timer_status: TimerStatus,
}

impl RoomSnapshot {
    pub fn is_owner(&self, user_id: &str) -> bool {
        self.owner_id.as_deref() == Some(user_id)
    }

    pub fn member(&self, user_id: &str) -> Option<&RoomMember> {
        self.members.iter().find(|m| m.user_id == user_id)
    }

    pub fn is_member(&self, user_id: &str) -> bool {
        self.member(user_id).is_some()
    }

    pub fn is_pending(&self, user_id: &str) -> bool {
        self.pending_requests.iter().any(|p| p.user_id == user_id)
    }

    pub fn is_blocked(&self, user_id: &str) -> bool {
        self.blocked_users.iter().any(|b| b == user_id)
    }

    /// Configured timer length in minutes.
    pub fn timer_minutes(&self) -> u32 {
        self.timer_duration
            .filter(|m| *m > 0)
            .unwrap_or(DEFAULT_TIMER_MINUTES)
    }

    pub fn has_chat(&self, id: &str) -> bool {
        !id.is_empty() && self.chat_history.iter().any(|m| m.id == id)
    }

    /// Resolve a user reference typed by a person: exact id first, then a
    /// case-insensitive name among members, pending requests and blocked ids.
    pub fn resolve_user(&self, reference: &str) -> Option<String> {
        let reference = reference.trim();
        if reference.is_empty() {
            return None;
        }
        let by_id = self
            .members
            .iter()
            .map(|m| m.user_id.as_str())
            .chain(self.pending_requests.iter().map(|p| p.user_id.as_str()))
            .chain(self.blocked_users.iter().map(String::as_str))
            .find(|id| *id == reference);
        if let Some(id) = by_id {
            return Some(id.to_string());
        }
        self.members
            .iter()
            .map(|m| (m.user_id.as_str(), m.name.as_str()))
            .chain(
                self.pending_requests
                    .iter()
                    .map(|p| (p.user_id.as_str(), p.name.as_str())),
            )
            .find(|(_, name)| name.eq_ignore_ascii_case(reference))
            .map(|(id, _)| id.to_string())
    }
}

/// Body for `POST /api/rooms`
#[derive(Debug, Clone, Serialize)]
pub struct NewRoom {
    pub name: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Outcome of `POST /api/rooms/{roomId}/join`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinStatus {
    Member,
    Pending,
}

#[derive(Debug, Deserialize)]
pub struct JoinResponse {
    pub status: JoinStatus,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_server_room_with_nulls() {
        let json = r#"{
            "roomId": "r1",
            "name": "Morning",
            "ownerId": "u1",
            "blockedUsers": null,
            "members": [{"userId": "u1", "name": "Ada", "status": "admin", "joinedAt": "2024-01-01T00:00:00"}],
            "pendingRequests": [{"userId": "u3", "name": "Cy", "status": "pending", "joinedAt": "x"}],
            "tasks": [{"id": "t1", "title": "Write", "status": "todo", "createdBy": "Ada", "createdAt": "x"}],
            "chatHistory": [],
            "createdAt": "2024-01-01T00:00:00",
            "timerStartTime": null,
            "timerDuration": 50,
            "timerStatus": null
        }"#;
        let room: RoomSnapshot = serde_json::from_str(json).unwrap();
        assert!(room.blocked_users.is_empty());
        assert_eq!(room.timer_status, TimerStatus::Stopped);
        assert_eq!(room.timer_minutes(), 50);
        assert_eq!(room.members[0].status, MemberRole::Admin);
        assert!(room.is_pending("u3"));
        assert!(room.is_owner("u1"));
    }

    #[test]
    fn resolves_users_by_id_or_name() {
        let room: RoomSnapshot = serde_json::from_value(serde_json::json!({
            "roomId": "r1",
            "ownerId": "u1",
            "members": [
                {"userId": "u1", "name": "Ada"},
                {"userId": "u2", "name": "Grace"}
            ],
            "pendingRequests": [{"userId": "u3", "name": "Linus"}],
            "blockedUsers": ["u9"]
        }))
        .unwrap();

        assert_eq!(room.resolve_user("u2").as_deref(), Some("u2"));
        assert_eq!(room.resolve_user("grace").as_deref(), Some("u2"));
        assert_eq!(room.resolve_user("Linus").as_deref(), Some("u3"));
        assert_eq!(room.resolve_user("u9").as_deref(), Some("u9"));
        assert_eq!(room.resolve_user("nobody"), None);
    }

    #[test]
    fn zero_duration_falls_back_to_default() {
        let room: RoomSnapshot =
            serde_json::from_value(serde_json::json!({"roomId": "r", "timerDuration": 0}))
                .unwrap();
        assert_eq!(room.timer_minutes(), DEFAULT_TIMER_MINUTES);
    }
}
