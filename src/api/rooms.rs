//! Focus room endpoints (`/api/rooms`)

use anyhow::{Context, Result};
use chrono::Utc;
use unicode_width::UnicodeWidthStr;

use super::client::FocusClient;
use crate::countdown::parse_server_timestamp;
use crate::models::{JoinResponse, JoinStatus, NewRoom, RoomSnapshot, RoomTask, TaskStatus};

/// Owner-only membership actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationAction {
    Approve,
    Kick,
    Block,
    Unblock,
}

impl ModerationAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ModerationAction::Approve => "approve",
            ModerationAction::Kick => "kick",
            ModerationAction::Block => "block",
            ModerationAction::Unblock => "unblock",
        }
    }
}

/// Owner-only timer actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    Start,
    Pause,
    Reset,
}

impl TimerAction {
    pub fn as_str(self) -> &'static str {
        match self {
            TimerAction::Start => "start",
            TimerAction::Pause => "pause",
            TimerAction::Reset => "reset",
        }
    }
}

pub async fn list_rooms_data(client: &FocusClient, search: Option<&str>) -> Result<Vec<RoomSnapshot>> {
    let query: Vec<(&str, &str)> = search
        .filter(|s| !s.trim().is_empty())
        .map(|s| vec![("search", s)])
        .unwrap_or_default();
    let resp = client.get("/api/rooms", &query).await?;
    resp.json().await.context("Failed to parse room list")
}

pub async fn get_room_data(client: &FocusClient, room_id: &str) -> Result<RoomSnapshot> {
    let resp = client.get(&format!("/api/rooms/{}", room_id), &[]).await?;
    resp.json()
        .await
        .with_context(|| format!("Failed to parse room {}", room_id))
}

pub async fn create_room_data(client: &FocusClient, room: &NewRoom) -> Result<RoomSnapshot> {
    let resp = client.post("/api/rooms", room).await?;
    resp.json().await.context("Failed to parse created room")
}

pub async fn join_room_data(
    client: &FocusClient,
    room_id: &str,
    password: &str,
) -> Result<JoinStatus> {
    let body = serde_json::json!({ "password": password });
    let resp = client
        .post(&format!("/api/rooms/{}/join", room_id), &body)
        .await?;
    let join: JoinResponse = resp.json().await.context("Failed to parse join response")?;
    if let Some(ref message) = join.message {
        tracing::debug!("Join {}: {}", room_id, message);
    }
    Ok(join.status)
}

pub async fn moderate_data(
    client: &FocusClient,
    room_id: &str,
    action: ModerationAction,
    member_id: &str,
) -> Result<()> {
    client
        .post_query(
            &format!("/api/rooms/{}/{}", room_id, action.as_str()),
            &[("member_id", member_id.to_string())],
        )
        .await?;
    Ok(())
}

pub async fn control_timer_data(
    client: &FocusClient,
    room_id: &str,
    action: TimerAction,
    minutes: u32,
) -> Result<()> {
    client
        .post_query(
            &format!("/api/rooms/{}/timer", room_id),
            &[
                ("action", action.as_str().to_string()),
                ("duration", minutes.to_string()),
            ],
        )
        .await?;
    Ok(())
}

pub async fn log_session_data(client: &FocusClient, room_id: &str, minutes: u32) -> Result<()> {
    let body = serde_json::json!({ "duration": minutes });
    client
        .post(&format!("/api/rooms/{}/log_session", room_id), &body)
        .await?;
    Ok(())
}

pub async fn create_room_task_data(
    client: &FocusClient,
    room_id: &str,
    title: &str,
) -> Result<RoomTask> {
    let body = serde_json::json!({ "title": title });
    let resp = client
        .post(&format!("/api/rooms/{}/tasks", room_id), &body)
        .await?;
    resp.json().await.context("Failed to parse created room task")
}

pub async fn update_room_task_data(
    client: &FocusClient,
    room_id: &str,
    task_id: &str,
    status: TaskStatus,
) -> Result<()> {
    let body = serde_json::json!({ "status": status });
    client
        .patch(&format!("/api/rooms/{}/tasks/{}", room_id, task_id), &body)
        .await?;
    Ok(())
}

/// Rooms past their expiry are hidden from listings.
pub fn is_listed(room: &RoomSnapshot) -> bool {
    match room.expires_at.as_deref().map(parse_server_timestamp) {
        Some(Ok(expires_at)) => expires_at > Utc::now(),
        _ => true,
    }
}

pub(crate) fn pad(text: &str, width: usize) -> String {
    let used = UnicodeWidthStr::width(text);
    format!("{}{}", text, " ".repeat(width.saturating_sub(used)))
}

/// List rooms (prints to stdout).
pub async fn list_rooms(client: &FocusClient, search: Option<&str>) -> Result<()> {
    let rooms: Vec<RoomSnapshot> = list_rooms_data(client, search)
        .await?
        .into_iter()
        .filter(is_listed)
        .collect();

    println!("\nFocus Rooms:");
    println!("{:-<60}", "");

    if rooms.is_empty() {
        println!("  (no active rooms)");
        return Ok(());
    }

    let width = rooms
        .iter()
        .map(|r| UnicodeWidthStr::width(r.name.as_str()))
        .max()
        .unwrap_or(0);

    for room in &rooms {
        println!(
            "{}  {} members  timer {}  owner {}",
            pad(&room.name, width),
            room.members.len(),
            room.timer_status.as_str(),
            room.owner_name.as_deref().unwrap_or("?")
        );
        println!("  ID: {}", room.room_id);
        if let Some(ref description) = room.description {
            if !description.trim().is_empty() {
                println!("  {}", description.trim());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_rooms_are_not_listed() {
        let expired: RoomSnapshot = serde_json::from_value(serde_json::json!({
            "roomId": "old",
            "expiresAt": "2001-01-01T00:00:00"
        }))
        .unwrap();
        let live: RoomSnapshot = serde_json::from_value(serde_json::json!({
            "roomId": "new",
            "expiresAt": "2999-01-01T00:00:00"
        }))
        .unwrap();
        let unknown: RoomSnapshot =
            serde_json::from_value(serde_json::json!({"roomId": "legacy"})).unwrap();
        assert!(!is_listed(&expired));
        assert!(is_listed(&live));
        assert!(is_listed(&unknown));
    }

    #[test]
    fn pads_by_display_width() {
        assert_eq!(pad("ab", 4), "ab  ");
        assert_eq!(pad("日本", 5), "日本 ");
        assert_eq!(pad("toolong", 3), "toolong");
    }
}
