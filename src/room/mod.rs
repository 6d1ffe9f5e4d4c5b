//! Focus room client: reconciler, dispatcher and the interactive session

pub mod dispatcher;
pub mod reconciler;
pub mod session;

#[cfg(test)]
mod fake;

use std::sync::Arc;

use anyhow::Result;

use crate::api::{FocusClient, RoomApi};
use crate::auth::Credentials;
use crate::config::Config;
use crate::models::{JoinStatus, NewRoom, RoomSnapshot};
use crate::push;

use dispatcher::{execute, Outcome, RestCall};
use session::{spawn_stdin_reader, RoomSession, SessionSettings};

/// Viewer's standing in a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipStatus {
    Admin,
    Member,
    Pending,
}

/// Derive a user's status from a snapshot. Ownership wins over membership,
/// membership over a pending request.
pub fn membership_status(room: &RoomSnapshot, user_id: &str) -> Option<MembershipStatus> {
    if room.is_owner(user_id) {
        Some(MembershipStatus::Admin)
    } else if room.is_member(user_id) {
        Some(MembershipStatus::Member)
    } else if room.is_pending(user_id) {
        Some(MembershipStatus::Pending)
    } else {
        None
    }
}

fn session_settings(
    credentials: &Credentials,
    config: &Config,
    room_id: &str,
    focus: Option<String>,
) -> SessionSettings {
    let ws_url = match push::room_endpoint(&credentials.api_url, room_id) {
        Ok(url) => Some(url),
        Err(e) => {
            tracing::warn!("Live updates disabled: {:#}", e);
            None
        }
    };
    SessionSettings {
        ws_url,
        token: credentials.token.clone(),
        reconnect: config.reconnect_policy(),
        default_minutes: config.timer_minutes(),
        focus,
    }
}

/// Open a room interactively until the user leaves or is removed.
pub async fn open_room(
    credentials: &Credentials,
    config: &Config,
    room_id: &str,
    focus: Option<String>,
) -> Result<()> {
    let api = Arc::new(FocusClient::new(credentials));
    let settings = session_settings(credentials, config, room_id, focus);
    let session = RoomSession::new(api, room_id, credentials.user.clone(), settings);

    println!("Type /help for commands, /leave to exit.");
    session.run(spawn_stdin_reader()).await
}

/// Ask to join a room, then open it. Pending users wait inside the room for
/// the owner's approval.
pub async fn join_room(
    credentials: &Credentials,
    config: &Config,
    room_id: &str,
    password: &str,
    focus: Option<String>,
) -> Result<()> {
    let client = FocusClient::new(credentials);
    let call = RestCall::Join {
        password: password.to_string(),
    };
    match execute(&client, room_id, call).await? {
        Outcome::Joined(JoinStatus::Member) => println!("Joined room {}", room_id),
        Outcome::Joined(JoinStatus::Pending) => {
            println!("Join request sent; waiting for the owner to approve")
        }
        other => tracing::debug!("Unexpected join outcome {:?}", other),
    }
    open_room(credentials, config, room_id, focus).await
}

/// Create a room and open it as its owner.
pub async fn create_room(
    credentials: &Credentials,
    config: &Config,
    room: NewRoom,
    focus: Option<String>,
) -> Result<()> {
    let client = FocusClient::new(credentials);
    let created = client.create_room(&room).await?;
    tracing::info!("Created room {} ({})", created.name, created.room_id);
    println!("Created room {}", created.name);
    println!("  ID: {}", created.room_id);
    open_room(credentials, config, &created.room_id, focus).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_derived_from_the_snapshot() {
        let room: RoomSnapshot = serde_json::from_value(serde_json::json!({
            "roomId": "r1",
            "ownerId": "U1",
            "members": [
                {"userId": "U1", "name": "One"},
                {"userId": "U2", "name": "Two"}
            ],
            "pendingRequests": [{"userId": "U3", "name": "Three"}]
        }))
        .unwrap();

        assert_eq!(membership_status(&room, "U1"), Some(MembershipStatus::Admin));
        assert_eq!(membership_status(&room, "U2"), Some(MembershipStatus::Member));
        assert_eq!(membership_status(&room, "U3"), Some(MembershipStatus::Pending));
        assert_eq!(membership_status(&room, "U4"), None);
    }

    #[test]
    fn owner_missing_from_members_is_still_admin() {
        let room: RoomSnapshot = serde_json::from_value(serde_json::json!({
            "roomId": "r1",
            "ownerId": "U1",
            "members": []
        }))
        .unwrap();
        assert_eq!(membership_status(&room, "U1"), Some(MembershipStatus::Admin));
    }
}
