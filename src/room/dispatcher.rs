//! Action dispatcher: user intents to REST calls or push sends
//!
//! Owner-only actions are gated here for UX only; the server remains the
//! authority and rejects them anyway. REST calls are confirmed and never
//! touch local state, with one exception: task toggles flip the cached
//! status immediately and rely on the next refetch to correct it.

use thiserror::Error;

use crate::api::{ModerationAction, RoomApi, TimerAction};
use crate::countdown::Completion;
use crate::models::{
    JoinStatus, NewPersonalTask, PersonalTask, PushMessage, RoomTask, TaskSource, TaskStatus,
    TimerStatus, User,
};

use super::reconciler::{RoomPhase, RoomReconciler};

/// Why an intent was not carried out.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Only the room owner can do that")]
    NotOwner,
    #[error("Join the room first")]
    NotMember,
    #[error("Room is not loaded yet")]
    NoRoom,
    #[error("You are no longer in this room")]
    Removed,
    #[error("Nothing to send")]
    EmptyInput,
    #[error("No task with id {0}")]
    UnknownTask(String),
    #[error("No user matching '{0}' in this room")]
    UnknownUser(String),
    #[error("Your identity is not known yet")]
    NoIdentity,
    #[error(transparent)]
    Api(#[from] anyhow::Error),
}

/// Something the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// `user` is an id or a display name known to the room.
    Moderate { action: ModerationAction, user: String },
    StartTimer { minutes: Option<u32> },
    PauseTimer,
    ResetTimer { minutes: Option<u32> },
    Chat { content: String },
    AddRoomTask { title: String },
    AddPersonalTask { title: String },
    ToggleTask { task_id: String },
    PresenceJoin { focus: Option<String> },
    PresenceLeave,
}

/// A confirmed REST call, ready to run off the session loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestCall {
    Join { password: String },
    Moderate { action: ModerationAction, member_id: String },
    Timer { action: TimerAction, minutes: u32 },
    CreateRoomTask { title: String },
    CreatePersonalTask(NewPersonalTask),
    UpdateTask { task_id: String, source: TaskSource, status: TaskStatus },
    /// Owner's completion callback: log the run, then reset the timer.
    CompleteSession { minutes: u32 },
}

impl RestCall {
    /// Short description for notices.
    pub fn label(&self) -> String {
        match self {
            RestCall::Join { .. } => "join".to_string(),
            RestCall::Moderate { action, .. } => action.as_str().to_string(),
            RestCall::Timer { action, minutes } => format!("timer {} ({}m)", action.as_str(), minutes),
            RestCall::CreateRoomTask { .. } => "add room task".to_string(),
            RestCall::CreatePersonalTask(_) => "add personal task".to_string(),
            RestCall::UpdateTask { status, .. } => format!("mark task {}", status.as_str()),
            RestCall::CompleteSession { minutes } => format!("complete {}m session", minutes),
        }
    }

    /// Whether success should be followed by a snapshot refetch.
    pub fn changes_room(&self) -> bool {
        !matches!(
            self,
            RestCall::CreatePersonalTask(_)
                | RestCall::UpdateTask {
                    source: TaskSource::Personal,
                    ..
                }
        )
    }

    /// Whether failure leaves an optimistic change that needs correcting.
    pub fn was_optimistic(&self) -> bool {
        matches!(self, RestCall::UpdateTask { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Planned {
    Rest(RestCall),
    /// Best-effort send on the push channel.
    Push(PushMessage),
}

/// Result of a successful REST call.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Done,
    Joined(JoinStatus),
    RoomTaskCreated(RoomTask),
    PersonalTaskCreated(PersonalTask),
    PersonalTaskUpdated(PersonalTask),
}

/// Plans intents for one room on behalf of one user.
pub struct ActionDispatcher {
    room_id: String,
    user: Option<User>,
    default_minutes: u32,
}

impl ActionDispatcher {
    pub fn new(room_id: impl Into<String>, user: Option<User>, default_minutes: u32) -> Self {
        Self {
            room_id: room_id.into(),
            user,
            default_minutes,
        }
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn set_user(&mut self, user: User) {
        self.user = Some(user);
    }

    /// Check an intent against the viewer's current standing and turn it into
    /// a call. Toggles are applied to the reconciler's cache here.
    pub fn plan(
        &self,
        intent: Intent,
        reconciler: &mut RoomReconciler,
    ) -> Result<Planned, DispatchError> {
        match reconciler.phase() {
            RoomPhase::Removed(_) => return Err(DispatchError::Removed),
            RoomPhase::Left => return Err(DispatchError::NoRoom),
            _ => {}
        }

        match intent {
            Intent::Moderate { action, user } => {
                self.require_owner(reconciler)?;
                let member_id = reconciler
                    .snapshot()
                    .and_then(|room| room.resolve_user(&user))
                    .ok_or_else(|| DispatchError::UnknownUser(user.trim().to_string()))?;
                Ok(Planned::Rest(RestCall::Moderate { action, member_id }))
            }
            Intent::StartTimer { minutes } => {
                self.require_owner(reconciler)?;
                // Resuming keeps the minutes the server left on a paused timer.
                let paused = reconciler
                    .snapshot()
                    .filter(|room| room.timer_status == TimerStatus::Paused)
                    .map(|room| room.timer_minutes());
                let minutes = minutes
                    .filter(|m| *m > 0)
                    .or(paused)
                    .unwrap_or(self.default_minutes);
                Ok(Planned::Rest(RestCall::Timer {
                    action: TimerAction::Start,
                    minutes,
                }))
            }
            Intent::PauseTimer => {
                self.require_owner(reconciler)?;
                let minutes = reconciler
                    .snapshot()
                    .map(|room| room.timer_minutes())
                    .unwrap_or(self.default_minutes);
                Ok(Planned::Rest(RestCall::Timer {
                    action: TimerAction::Pause,
                    minutes,
                }))
            }
            Intent::ResetTimer { minutes } => {
                self.require_owner(reconciler)?;
                Ok(Planned::Rest(RestCall::Timer {
                    action: TimerAction::Reset,
                    minutes: self.minutes_or_default(minutes),
                }))
            }
            Intent::Chat { content } => {
                require_member(reconciler)?;
                let content = content.trim();
                if content.is_empty() {
                    return Err(DispatchError::EmptyInput);
                }
                let user = self.user.as_ref().ok_or(DispatchError::NoIdentity)?;
                Ok(Planned::Push(PushMessage::chat(user, content)))
            }
            Intent::AddRoomTask { title } => {
                require_member(reconciler)?;
                let title = non_empty(&title)?;
                Ok(Planned::Rest(RestCall::CreateRoomTask { title }))
            }
            Intent::AddPersonalTask { title } => {
                let title = non_empty(&title)?;
                Ok(Planned::Rest(RestCall::CreatePersonalTask(
                    NewPersonalTask::new(title),
                )))
            }
            Intent::ToggleTask { task_id } => {
                let task_id = task_id.trim().to_string();
                let source = reconciler
                    .display_tasks()
                    .iter()
                    .find(|t| t.id == task_id)
                    .map(|t| t.source)
                    .ok_or_else(|| DispatchError::UnknownTask(task_id.clone()))?;
                if source == TaskSource::Room {
                    require_member(reconciler)?;
                }
                let (source, status) = reconciler
                    .toggle_task_locally(&task_id)
                    .ok_or_else(|| DispatchError::UnknownTask(task_id.clone()))?;
                Ok(Planned::Rest(RestCall::UpdateTask {
                    task_id,
                    source,
                    status,
                }))
            }
            Intent::PresenceJoin { focus } => {
                let user = self.user.as_ref().ok_or(DispatchError::NoIdentity)?;
                Ok(Planned::Push(PushMessage::joined(user, focus.as_deref())))
            }
            Intent::PresenceLeave => {
                let user = self.user.as_ref().ok_or(DispatchError::NoIdentity)?;
                Ok(Planned::Push(PushMessage::left(user)))
            }
        }
    }

    /// The owner's completion callback as a call.
    pub fn plan_completion(&self, completion: &Completion) -> Option<RestCall> {
        if completion.room_id != self.room_id {
            return None;
        }
        Some(RestCall::CompleteSession {
            minutes: completion.minutes,
        })
    }

    fn require_owner(&self, reconciler: &RoomReconciler) -> Result<(), DispatchError> {
        if reconciler.snapshot().is_none() {
            return Err(DispatchError::NoRoom);
        }
        if !reconciler.is_owner() {
            return Err(DispatchError::NotOwner);
        }
        Ok(())
    }

    fn minutes_or_default(&self, minutes: Option<u32>) -> u32 {
        minutes.filter(|m| *m > 0).unwrap_or(self.default_minutes)
    }
}

fn require_member(reconciler: &RoomReconciler) -> Result<(), DispatchError> {
    match reconciler.phase() {
        RoomPhase::Member | RoomPhase::Admin => Ok(()),
        _ if reconciler.snapshot().is_none() => Err(DispatchError::NoRoom),
        _ => Err(DispatchError::NotMember),
    }
}

fn non_empty(text: &str) -> Result<String, DispatchError> {
    let text = text.trim();
    if text.is_empty() {
        Err(DispatchError::EmptyInput)
    } else {
        Ok(text.to_string())
    }
}

/// Run a planned REST call against the API.
pub async fn execute<A: RoomApi + ?Sized>(
    api: &A,
    room_id: &str,
    call: RestCall,
) -> Result<Outcome, DispatchError> {
    tracing::debug!("Room {}: {}", room_id, call.label());
    let outcome = match call {
        RestCall::Join { password } => Outcome::Joined(api.join_room(room_id, &password).await?),
        RestCall::Moderate { action, member_id } => {
            api.moderate(room_id, action, &member_id).await?;
            Outcome::Done
        }
        RestCall::Timer { action, minutes } => {
            api.control_timer(room_id, action, minutes).await?;
            Outcome::Done
        }
        RestCall::CreateRoomTask { title } => {
            Outcome::RoomTaskCreated(api.create_room_task(room_id, &title).await?)
        }
        RestCall::CreatePersonalTask(task) => {
            Outcome::PersonalTaskCreated(api.create_personal_task(&task).await?)
        }
        RestCall::UpdateTask {
            task_id,
            source: TaskSource::Room,
            status,
        } => {
            api.update_room_task(room_id, &task_id, status).await?;
            Outcome::Done
        }
        RestCall::UpdateTask {
            task_id,
            source: TaskSource::Personal,
            status,
        } => Outcome::PersonalTaskUpdated(api.update_personal_task(&task_id, status).await?),
        RestCall::CompleteSession { minutes } => {
            // The reset goes out even if logging failed; a stuck timer at
            // zero is worse than a missing history entry.
            let logged = api.log_session(room_id, minutes).await;
            if let Err(ref e) = logged {
                tracing::warn!("Failed to log session for room {}: {:#}", room_id, e);
            }
            api.control_timer(room_id, TimerAction::Reset, minutes)
                .await?;
            logged?;
            Outcome::Done
        }
    };
    Ok(outcome)
}
