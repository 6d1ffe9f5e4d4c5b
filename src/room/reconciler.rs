//! Room state reconciler
//!
//! Owns the cached [`RoomSnapshot`] for one room and folds the push log into
//! it. Push messages are treated as invalidation signals: anything that
//! changes room state asks for a full refetch instead of patching fields, so
//! the cache always converges to what the read API says. The two exceptions
//! are chat lines, which are shown as they arrive and de-duplicated against
//! the persisted history, and kick/block of the viewer, which discards the
//! snapshot outright.

use anyhow::Result;

use crate::models::{
    ChatMessage, DisplayTask, PersonalTask, PushMessage, RemovalKind, RoomSnapshot, TaskSource,
    TaskStatus,
};

use super::{membership_status, MembershipStatus};

/// Viewer's position in the room lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    NotJoined,
    Pending,
    Member,
    Admin,
    Removed(RemovalKind),
    /// The viewer left; nothing more will be applied.
    Left,
}

/// Work the session must do after a reconcile pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// The snapshot is stale; fetch it again. At most one per pass.
    Refetch,
    /// The viewer's join request was approved.
    Approved { room_name: Option<String> },
    /// The viewer was kicked or blocked; the snapshot is gone.
    Removed(RemovalKind),
    /// A chat line not yet in the transcript.
    Chat(ChatMessage),
    Presence {
        user_id: Option<String>,
        name: String,
        focus: Option<String>,
        joined: bool,
    },
}

/// Identifies one issued refetch so late responses can be recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefetchTicket {
    room_id: String,
    generation: u64,
}

impl RefetchTicket {
    pub fn room_id(&self) -> &str {
        &self.room_id
    }
}

/// What happened to a refetch response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefetchOutcome {
    Applied,
    /// A newer request was applied, or the snapshot was invalidated after
    /// this one was issued.
    Stale,
    /// The room was left or removed, or the ticket is for another room.
    Discarded,
    /// The request failed; the previous snapshot is kept.
    Failed,
    /// The fresh snapshot lists the viewer as blocked.
    Blocked,
}

enum Closed {
    Removed(RemovalKind),
    Left,
}

pub struct RoomReconciler {
    room_id: String,
    self_id: Option<String>,
    snapshot: Option<RoomSnapshot>,
    /// Number of push log entries already consumed.
    processed: usize,
    /// Chat received live and not yet seen in a refetched history.
    live_chat: Vec<ChatMessage>,
    personal_tasks: Vec<PersonalTask>,
    issued: u64,
    applied: u64,
    /// Requests issued at or below this generation predate the latest
    /// invalidation or optimistic edit.
    floor: u64,
    closed: Option<Closed>,
}

impl RoomReconciler {
    pub fn new(room_id: impl Into<String>, self_id: Option<String>) -> Self {
        Self {
            room_id: room_id.into(),
            self_id,
            snapshot: None,
            processed: 0,
            live_chat: Vec::new(),
            personal_tasks: Vec::new(),
            issued: 0,
            applied: 0,
            floor: 0,
            closed: None,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn snapshot(&self) -> Option<&RoomSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn self_id(&self) -> Option<&str> {
        self.self_id.as_deref()
    }

    /// Identity can resolve after the room is opened; status follows it.
    pub fn set_identity(&mut self, user_id: impl Into<String>) {
        self.self_id = Some(user_id.into());
    }

    /// Viewer's status, derived from the current snapshot and identity.
    pub fn status(&self) -> Option<MembershipStatus> {
        match (self.snapshot.as_ref(), self.self_id.as_deref()) {
            (Some(room), Some(user_id)) => membership_status(room, user_id),
            _ => None,
        }
    }

    pub fn is_owner(&self) -> bool {
        self.status() == Some(MembershipStatus::Admin)
    }

    pub fn phase(&self) -> RoomPhase {
        match self.closed {
            Some(Closed::Removed(kind)) => RoomPhase::Removed(kind),
            Some(Closed::Left) => RoomPhase::Left,
            None => match self.status() {
                Some(MembershipStatus::Admin) => RoomPhase::Admin,
                Some(MembershipStatus::Member) => RoomPhase::Member,
                Some(MembershipStatus::Pending) => RoomPhase::Pending,
                None => RoomPhase::NotJoined,
            },
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    /// How many push log entries have been consumed.
    #[cfg(test)]
    pub fn processed(&self) -> usize {
        self.processed
    }

    /// Install a snapshot obtained outside a refetch (creation or join).
    pub fn seed(&mut self, snapshot: RoomSnapshot) {
        if self.closed.is_some() || snapshot.room_id != self.room_id {
            return;
        }
        self.snapshot = Some(snapshot);
        self.prune_live_chat();
    }

    /// A new connection starts a new log.
    pub fn attach_new_log(&mut self) {
        self.processed = 0;
    }

    /// Consume the entries appended since the last pass.
    pub fn reconcile(&mut self, log: &[PushMessage]) -> Vec<Effect> {
        if self.processed > log.len() {
            tracing::warn!(
                "Push log for room {} shrank ({} < {}), skipping",
                self.room_id,
                log.len(),
                self.processed
            );
            self.processed = log.len();
            return Vec::new();
        }

        let fresh = &log[self.processed..];
        self.processed = log.len();

        let mut effects = Vec::new();
        let mut refetch = false;

        for message in fresh {
            if self.closed.is_some() {
                break;
            }
            tracing::debug!("Room {}: {}", self.room_id, message.kind());

            if let Some((kind, target)) = message.removal() {
                if self.self_id.as_deref() == Some(target) {
                    tracing::info!("Removed from room {} ({:?})", self.room_id, kind);
                    self.discard(Closed::Removed(kind));
                    effects.push(Effect::Removed(kind));
                    refetch = false;
                    break;
                }
            }

            match message {
                PushMessage::MemberApproved { user_id, room_name } => {
                    let was_member = matches!(
                        self.status(),
                        Some(MembershipStatus::Member | MembershipStatus::Admin)
                    );
                    if self.self_id.as_deref() == Some(user_id.as_str()) && !was_member {
                        effects.push(Effect::Approved {
                            room_name: room_name.clone(),
                        });
                    }
                    refetch = true;
                }
                PushMessage::ChatMessage { .. } => {
                    if let Some(chat) = message.as_chat() {
                        if !self.knows_chat(&chat.id) {
                            self.live_chat.push(chat.clone());
                            effects.push(Effect::Chat(chat));
                        }
                    }
                }
                PushMessage::UserJoined {
                    user_id,
                    user_name,
                    task,
                    ..
                } => effects.push(Effect::Presence {
                    user_id: user_id.clone(),
                    name: user_name.clone().unwrap_or_else(|| "Someone".to_string()),
                    focus: task.clone(),
                    joined: true,
                }),
                PushMessage::UserLeft {
                    user_id, user_name, ..
                } => effects.push(Effect::Presence {
                    user_id: user_id.clone(),
                    name: user_name.clone().unwrap_or_else(|| "Someone".to_string()),
                    focus: None,
                    joined: false,
                }),
                other if other.invalidates_snapshot() => refetch = true,
                _ => {}
            }
        }

        if refetch {
            self.floor = self.issued;
            effects.push(Effect::Refetch);
        }
        effects
    }

    fn knows_chat(&self, id: &str) -> bool {
        if id.is_empty() {
            return false;
        }
        self.snapshot.as_ref().is_some_and(|s| s.has_chat(id))
            || self.live_chat.iter().any(|m| m.id == id)
    }

    /// Drop live lines the persisted history now contains.
    fn prune_live_chat(&mut self) {
        if let Some(ref snapshot) = self.snapshot {
            self.live_chat.retain(|m| !snapshot.has_chat(&m.id));
        }
    }

    /// Persisted history followed by live lines, each id at most once.
    pub fn transcript(&self) -> Vec<&ChatMessage> {
        let history = self
            .snapshot
            .as_ref()
            .map(|s| s.chat_history.as_slice())
            .unwrap_or_default();
        let mut lines: Vec<&ChatMessage> = Vec::with_capacity(history.len() + self.live_chat.len());
        for message in history.iter().chain(self.live_chat.iter()) {
            let duplicate = !message.id.is_empty() && lines.iter().any(|m| m.id == message.id);
            if !duplicate {
                lines.push(message);
            }
        }
        lines
    }

    /// Ask for a refetch. `None` once the room is closed.
    pub fn begin_refetch(&mut self) -> Option<RefetchTicket> {
        if self.closed.is_some() {
            return None;
        }
        self.issued += 1;
        Some(RefetchTicket {
            room_id: self.room_id.clone(),
            generation: self.issued,
        })
    }

    /// Apply a refetch response. Failures keep the last good snapshot.
    pub fn apply_refetch(
        &mut self,
        ticket: RefetchTicket,
        result: Result<RoomSnapshot>,
    ) -> RefetchOutcome {
        if ticket.room_id != self.room_id || self.closed.is_some() {
            tracing::debug!("Discarding refetch for room {}", ticket.room_id);
            return RefetchOutcome::Discarded;
        }
        if ticket.generation <= self.applied.max(self.floor) {
            tracing::debug!(
                "Discarding stale refetch #{} (applied #{}, invalidated at #{})",
                ticket.generation,
                self.applied,
                self.floor
            );
            return RefetchOutcome::Stale;
        }

        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("Refetch of room {} failed: {:#}", self.room_id, e);
                return RefetchOutcome::Failed;
            }
        };

        self.applied = ticket.generation;

        if let Some(ref self_id) = self.self_id {
            if snapshot.is_blocked(self_id) {
                tracing::info!("Blocked from room {}", self.room_id);
                self.discard(Closed::Removed(RemovalKind::Blocked));
                return RefetchOutcome::Blocked;
            }
        }

        tracing::info!(
            "Room {} refreshed: {} members, {} pending, {} tasks, timer {}",
            self.room_id,
            snapshot.members.len(),
            snapshot.pending_requests.len(),
            snapshot.tasks.len(),
            snapshot.timer_status.as_str()
        );
        self.snapshot = Some(snapshot);
        self.prune_live_chat();
        RefetchOutcome::Applied
    }

    pub fn set_personal_tasks(&mut self, tasks: Vec<PersonalTask>) {
        self.personal_tasks = tasks;
    }

    pub fn add_personal_task(&mut self, task: PersonalTask) {
        if !self.personal_tasks.iter().any(|t| t.id == task.id) {
            self.personal_tasks.push(task);
        }
    }

    /// Room tasks followed by the viewer's personal tasks.
    pub fn display_tasks(&self) -> Vec<DisplayTask> {
        let room_tasks = self
            .snapshot
            .as_ref()
            .map(|s| s.tasks.as_slice())
            .unwrap_or_default();
        room_tasks
            .iter()
            .map(DisplayTask::from)
            .chain(self.personal_tasks.iter().map(DisplayTask::from))
            .collect()
    }

    /// Flip a task's status in place ahead of the server's confirmation.
    /// The next refetch corrects it if the server disagrees.
    pub fn toggle_task_locally(&mut self, task_id: &str) -> Option<(TaskSource, TaskStatus)> {
        if let Some(task) = self
            .snapshot
            .as_mut()
            .and_then(|s| s.tasks.iter_mut().find(|t| t.id == task_id))
        {
            task.status = task.status.toggled();
            let status = task.status;
            self.floor = self.issued;
            return Some((TaskSource::Room, status));
        }
        if let Some(task) = self.personal_tasks.iter_mut().find(|t| t.id == task_id) {
            task.status = task.status.toggled();
            return Some((TaskSource::Personal, task.status));
        }
        None
    }

    /// The viewer left the room.
    pub fn leave(&mut self) {
        if self.closed.is_none() {
            self.discard(Closed::Left);
        }
    }

    fn discard(&mut self, reason: Closed) {
        self.snapshot = None;
        self.live_chat.clear();
        self.closed = Some(reason);
    }
}
