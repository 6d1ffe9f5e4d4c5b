//! Interactive room session
//!
//! One task owns the reconciler, countdown and push channel. Everything that
//! waits (REST calls, the socket, the tick, stdin) reports back into a single
//! `select!` loop, so state changes never interleave.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use unicode_width::UnicodeWidthStr;

use crate::api::{pad, AuthExpired, ModerationAction, RoomApi};
use crate::countdown::{
    format_clock, parse_server_timestamp, progress_percent, Countdown, Tick, Ticker, TimerPhase,
};
use crate::models::{ChatMessage, PersonalTask, RemovalKind, User};
use crate::push::{Backoff, PushChannel, ReconnectPolicy};

use super::dispatcher::{
    execute, ActionDispatcher, DispatchError, Intent, Outcome, Planned, RestCall,
};
use super::reconciler::{Effect, RefetchOutcome, RefetchTicket, RoomPhase, RoomReconciler};

/// Line shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Info(String),
    Warn(String),
    Chat(ChatMessage),
    Clock(String),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Info(text) => write!(f, "* {}", text),
            Notice::Warn(text) => write!(f, "! {}", text),
            Notice::Clock(text) => write!(f, "# {}", text),
            Notice::Chat(message) => {
                let time = message
                    .timestamp
                    .as_deref()
                    .and_then(|t| parse_server_timestamp(t).ok())
                    .map(|t| t.with_timezone(&Local).format("%H:%M ").to_string())
                    .unwrap_or_default();
                write!(f, "{}{}: {}", time, message.user_name, message.content)
            }
        }
    }
}

/// Completed background work, delivered to the session loop.
pub enum SessionEvent {
    Refetched(RefetchTicket, Result<crate::models::RoomSnapshot>),
    PersonalTasks(Result<Vec<PersonalTask>>),
    Identity(Result<User>),
    ActionFinished {
        label: String,
        call: RestCall,
        result: Result<Outcome, DispatchError>,
    },
}

/// What the loop should do after handling an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Reconnect,
    /// The user leaves: say goodbye on the channel first.
    Leave,
    /// The room is gone for this user.
    Exit,
}

/// A line typed into the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Act(Intent),
    Tasks,
    Members,
    Who,
    Timer,
    Reconnect,
    Leave,
    Help,
}

const HELP: &str = "\
/start [min]      start the timer (owner)
/pause            pause the timer (owner)
/reset [min]      reset the timer (owner)
/approve <user>   approve a join request (owner)
/kick <user>      remove a member (owner)
/block <user>     remove and block a member (owner)
/unblock <user>   lift a block (owner)
/task <title>     add a room task
/mytask <title>   add a personal task
/toggle <id>      toggle a task between todo and completed
/tasks /members /who /timer
/reconnect        reopen the live update channel
/leave            leave the room
anything else is sent as chat";

impl Command {
    /// Parse one input line. `Ok(None)` for blank lines, `Err` carries usage.
    pub fn parse(line: &str) -> Result<Option<Command>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Some(Command::Act(Intent::Chat {
                content: line.to_string(),
            })));
        };

        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };

        let minutes = |usage: &str| -> Result<Option<u32>, String> {
            if arg.is_empty() {
                return Ok(None);
            }
            match arg.parse::<u32>() {
                Ok(m) if m > 0 => Ok(Some(m)),
                _ => Err(usage.to_string()),
            }
        };
        let required = |usage: &str| -> Result<String, String> {
            if arg.is_empty() {
                Err(usage.to_string())
            } else {
                Ok(arg.to_string())
            }
        };
        let moderate = |action: ModerationAction, usage: &str| -> Result<Option<Command>, String> {
            Ok(Some(Command::Act(Intent::Moderate {
                action,
                user: required(usage)?,
            })))
        };

        let command = match name.to_ascii_lowercase().as_str() {
            "start" => Command::Act(Intent::StartTimer {
                minutes: minutes("usage: /start [minutes]")?,
            }),
            "pause" => Command::Act(Intent::PauseTimer),
            "reset" => Command::Act(Intent::ResetTimer {
                minutes: minutes("usage: /reset [minutes]")?,
            }),
            "approve" => return moderate(ModerationAction::Approve, "usage: /approve <user>"),
            "kick" => return moderate(ModerationAction::Kick, "usage: /kick <user>"),
            "block" => return moderate(ModerationAction::Block, "usage: /block <user>"),
            "unblock" => return moderate(ModerationAction::Unblock, "usage: /unblock <user>"),
            "task" => Command::Act(Intent::AddRoomTask {
                title: required("usage: /task <title>")?,
            }),
            "mytask" => Command::Act(Intent::AddPersonalTask {
                title: required("usage: /mytask <title>")?,
            }),
            "toggle" => Command::Act(Intent::ToggleTask {
                task_id: required("usage: /toggle <task id>")?,
            }),
            "tasks" => Command::Tasks,
            "members" => Command::Members,
            "who" => Command::Who,
            "timer" => Command::Timer,
            "reconnect" => Command::Reconnect,
            "leave" | "quit" => Command::Leave,
            "help" => Command::Help,
            other => return Err(format!("Unknown command /{}; /help lists commands", other)),
        };
        Ok(Some(command))
    }
}

/// Connection and behaviour settings for a session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Push endpoint; `None` runs without live updates.
    pub ws_url: Option<String>,
    pub token: String,
    pub reconnect: ReconnectPolicy,
    pub default_minutes: u32,
    /// Announced in the presence ping.
    pub focus: Option<String>,
}

pub struct RoomSession<A: RoomApi + 'static> {
    api: Arc<A>,
    settings: SessionSettings,
    reconciler: RoomReconciler,
    dispatcher: ActionDispatcher,
    countdown: Countdown,
    ticker: Ticker,
    channel: PushChannel,
    backoff: Backoff,
    connected_since: Option<Instant>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    inflight: Vec<JoinHandle<()>>,
    last_phase: Option<RoomPhase>,
    last_clock: Option<(&'static str, u64)>,
    notices: Vec<Notice>,
}

impl<A: RoomApi + 'static> RoomSession<A> {
    pub fn new(api: Arc<A>, room_id: &str, user: Option<User>, settings: SessionSettings) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let self_id = user.as_ref().map(|u| u.id.clone());
        Self {
            api,
            reconciler: RoomReconciler::new(room_id, self_id),
            dispatcher: ActionDispatcher::new(room_id, user, settings.default_minutes),
            countdown: Countdown::new(room_id),
            ticker: Ticker::new(),
            channel: PushChannel::disconnected(room_id),
            backoff: Backoff::default(),
            connected_since: None,
            events_tx,
            events_rx,
            inflight: Vec::new(),
            last_phase: None,
            last_clock: None,
            notices: Vec::new(),
            settings,
        }
    }

    #[cfg(test)]
    pub fn reconciler(&self) -> &RoomReconciler {
        &self.reconciler
    }

    #[cfg(test)]
    pub fn countdown(&self) -> &Countdown {
        &self.countdown
    }

    /// Run until the user leaves or is removed. `lines` carries user input.
    pub async fn run(mut self, mut lines: mpsc::UnboundedReceiver<String>) -> Result<()> {
        self.open().await?;
        self.flush();

        let mut reconnect_at = self.connect_channel().await.map(|d| Instant::now() + d);
        let mut log_rx = self.channel.log().subscribe();
        let mut conn_rx = self.channel.watch_connection();
        self.on_log_changed();
        self.flush();

        loop {
            self.sync_ticker();

            let flow = tokio::select! {
                Some(event) = self.events_rx.recv() => self.on_event(event),
                _ = self.ticker.tick() => self.on_tick(Utc::now()),
                Ok(()) = log_rx.changed() => self.on_log_changed(),
                Ok(()) = conn_rx.changed() => {
                    let connected = *conn_rx.borrow_and_update();
                    if let Some(delay) = self.on_connection_change(connected) {
                        reconnect_at = Some(Instant::now() + delay);
                    }
                    Flow::Continue
                }
                line = lines.recv() => match line {
                    Some(line) => self.on_line(&line),
                    None => {
                        tracing::debug!("Input closed");
                        Flow::Leave
                    }
                },
                _ = sleep_until(reconnect_at) => Flow::Reconnect,
                _ = tokio::signal::ctrl_c() => Flow::Leave,
            };

            match flow {
                Flow::Continue => {}
                Flow::Reconnect => {
                    reconnect_at = self.reconnect().await.map(|d| Instant::now() + d);
                    log_rx = self.channel.log().subscribe();
                    conn_rx = self.channel.watch_connection();
                }
                Flow::Leave => {
                    self.leave().await;
                    self.flush();
                    break;
                }
                Flow::Exit => {
                    self.shutdown().await;
                    self.flush();
                    break;
                }
            }
            self.flush();
        }
        Ok(())
    }

    /// Load the room and print its current state.
    pub async fn open(&mut self) -> Result<()> {
        let room_id = self.reconciler.room_id().to_string();
        let room = self
            .api
            .get_room(&room_id)
            .await
            .with_context(|| format!("Failed to load room {}", room_id))?;
        self.reconciler.seed(room);

        self.print_header();
        self.on_snapshot_changed();
        for line in self.reconciler.transcript() {
            self.notices.push(Notice::Chat(line.clone()));
        }

        if self.dispatcher.user().is_none() {
            let api = Arc::clone(&self.api);
            let tx = self.events_tx.clone();
            self.spawn(async move {
                let _ = tx.send(SessionEvent::Identity(api.me().await));
            });
        }
        let api = Arc::clone(&self.api);
        let tx = self.events_tx.clone();
        self.spawn(async move {
            let _ = tx.send(SessionEvent::PersonalTasks(api.list_personal_tasks().await));
        });
        Ok(())
    }

    /// Open a fresh push connection, replacing any previous one. Returns the
    /// delay before the next attempt if it failed and backoff is enabled.
    async fn connect_channel(&mut self) -> Option<Duration> {
        let old = std::mem::replace(
            &mut self.channel,
            PushChannel::disconnected(self.reconciler.room_id()),
        );
        old.close().await;
        self.reconciler.attach_new_log();

        let ws_url = self.settings.ws_url.clone()?;
        self.channel =
            PushChannel::connect(&ws_url, self.reconciler.room_id(), &self.settings.token).await;

        if self.channel.is_connected() {
            tracing::info!("Push channel open for room {}", self.reconciler.room_id());
            self.connected_since = Some(Instant::now());
            self.notify(Notice::Info("Live updates connected".into()));
            self.send_presence_join();
            None
        } else {
            self.notify(Notice::Warn(
                "Live updates unavailable; /reconnect to retry".into(),
            ));
            self.retry_delay()
        }
    }

    /// Replace a dropped channel. The new log starts empty and anything sent
    /// while we were away is lost, so the snapshot is refetched.
    async fn reconnect(&mut self) -> Option<Duration> {
        self.notify(Notice::Info("Reconnecting live updates...".into()));
        let retry = self.connect_channel().await;
        self.on_log_changed();
        self.request_refetch();
        retry
    }

    fn retry_delay(&mut self) -> Option<Duration> {
        if self.settings.reconnect != ReconnectPolicy::Backoff || self.reconciler.is_closed() {
            return None;
        }
        if self
            .connected_since
            .take()
            .is_some_and(|since| since.elapsed() >= Backoff::STABLE_AFTER)
        {
            self.backoff.reset();
        }
        let delay = self.backoff.next_delay();
        self.notify(Notice::Info(format!(
            "Retrying in {}s",
            delay.as_secs()
        )));
        Some(delay)
    }

    fn on_connection_change(&mut self, connected: bool) -> Option<Duration> {
        if connected || self.reconciler.is_closed() {
            return None;
        }
        tracing::warn!("Push channel for room {} dropped", self.reconciler.room_id());
        self.notify(Notice::Warn(
            "Live updates disconnected; /reconnect to retry".into(),
        ));
        self.retry_delay()
    }

    /// Fold new push messages into the snapshot.
    pub fn on_log_changed(&mut self) -> Flow {
        let effects = self
            .channel
            .log()
            .read(|entries| self.reconciler.reconcile(entries));

        let mut flow = Flow::Continue;
        for effect in effects {
            match effect {
                Effect::Refetch => self.request_refetch(),
                Effect::Approved { room_name } => {
                    let name = room_name.unwrap_or_else(|| "the room".to_string());
                    self.notify(Notice::Info(format!("You were approved to join {}", name)));
                }
                Effect::Removed(kind) => flow = self.on_removed(kind),
                Effect::Chat(message) => self.notify(Notice::Chat(message)),
                Effect::Presence {
                    user_id,
                    name,
                    focus,
                    joined,
                } => {
                    if user_id.is_some() && user_id.as_deref() == self.reconciler.self_id() {
                        continue;
                    }
                    let text = match (joined, focus) {
                        (true, Some(focus)) => format!("{} joined, focusing on {}", name, focus),
                        (true, None) => format!("{} joined", name),
                        (false, _) => format!("{} left", name),
                    };
                    self.notify(Notice::Info(text));
                }
            }
        }
        flow
    }

    fn on_removed(&mut self, kind: RemovalKind) -> Flow {
        self.countdown.stop();
        self.ticker.arm(false);
        self.notify(Notice::Warn(kind.notice().to_string()));
        Flow::Exit
    }

    /// The token was rejected mid-session: drop everything tied to it.
    fn on_auth_expired(&mut self) -> Flow {
        self.countdown.stop();
        self.ticker.arm(false);
        self.notify(Notice::Warn(
            "Your session has expired; run 'focusroom login' and reopen the room".into(),
        ));
        Flow::Exit
    }

    pub fn on_event(&mut self, event: SessionEvent) -> Flow {
        match event {
            SessionEvent::Refetched(_, Err(e)) if AuthExpired::is(&e) => {
                return self.on_auth_expired();
            }
            SessionEvent::Refetched(ticket, result) => {
                match self.reconciler.apply_refetch(ticket, result) {
                    RefetchOutcome::Applied => self.on_snapshot_changed(),
                    RefetchOutcome::Blocked => return self.on_removed(RemovalKind::Blocked),
                    RefetchOutcome::Failed => self.notify(Notice::Warn(
                        "Could not refresh the room; showing last known state".into(),
                    )),
                    RefetchOutcome::Stale | RefetchOutcome::Discarded => {}
                }
            }
            SessionEvent::PersonalTasks(Ok(tasks)) => {
                tracing::debug!("Loaded {} personal tasks", tasks.len());
                self.reconciler.set_personal_tasks(tasks);
            }
            SessionEvent::PersonalTasks(Err(e)) if AuthExpired::is(&e) => {
                return self.on_auth_expired();
            }
            SessionEvent::PersonalTasks(Err(e)) => {
                tracing::warn!("Failed to load personal tasks: {:#}", e);
            }
            SessionEvent::Identity(Ok(user)) => {
                tracing::info!("Signed in as {} ({})", user.name, user.id);
                self.reconciler.set_identity(user.id.clone());
                self.dispatcher.set_user(user);
                self.send_presence_join();
                self.on_snapshot_changed();
            }
            SessionEvent::Identity(Err(e)) if AuthExpired::is(&e) => {
                return self.on_auth_expired();
            }
            SessionEvent::Identity(Err(e)) => {
                tracing::warn!("Failed to resolve identity: {:#}", e);
                self.notify(Notice::Warn(format!("Could not resolve your identity: {:#}", e)));
            }
            SessionEvent::ActionFinished {
                label,
                call,
                result,
            } => return self.on_action_finished(label, call, result),
        }
        Flow::Continue
    }

    fn on_action_finished(
        &mut self,
        label: String,
        call: RestCall,
        result: Result<Outcome, DispatchError>,
    ) -> Flow {
        match result {
            Ok(outcome) => {
                match outcome {
                    Outcome::RoomTaskCreated(task) => {
                        self.notify(Notice::Info(format!("Added room task {} ({})", task.title, task.id)))
                    }
                    Outcome::PersonalTaskCreated(task) => {
                        self.notify(Notice::Info(format!(
                            "Added personal task {} ({})",
                            task.title, task.id
                        )));
                        self.reconciler.add_personal_task(task);
                    }
                    Outcome::Joined(status) => {
                        self.notify(Notice::Info(format!("Join: {:?}", status).to_lowercase()))
                    }
                    Outcome::PersonalTaskUpdated(_) | Outcome::Done => {
                        self.notify(Notice::Info(format!("{}: done", label)))
                    }
                }
                if call.changes_room() {
                    self.request_refetch();
                }
            }
            Err(DispatchError::Api(e)) if AuthExpired::is(&e) => return self.on_auth_expired(),
            Err(e) => {
                tracing::warn!("{} failed: {:#}", label, e);
                self.notify(Notice::Warn(format!("{} failed: {:#}", label, e)));
                if call.was_optimistic() {
                    self.request_refetch();
                    self.reload_personal_tasks();
                }
            }
        }
        Flow::Continue
    }

    /// Recompute the countdown from the wall clock.
    pub fn on_tick(&mut self, now: DateTime<Utc>) -> Flow {
        if self.reconciler.is_closed() {
            return Flow::Continue;
        }
        let tick = self.countdown.tick(now, self.reconciler.is_owner());
        self.on_clock(tick);
        Flow::Continue
    }

    /// The tick only exists while the timer runs in an open room.
    fn sync_ticker(&mut self) {
        self.ticker
            .arm(self.countdown.is_running() && !self.reconciler.is_closed());
    }

    fn on_snapshot_changed(&mut self) {
        let is_owner = self.reconciler.is_owner();
        if let Some(room) = self.reconciler.snapshot() {
            let tick = self.countdown.sync(room, Utc::now(), is_owner);
            self.on_clock(tick);
        }
        self.sync_ticker();

        let phase = self.reconciler.phase();
        if self.last_phase != Some(phase) {
            self.last_phase = Some(phase);
            let text = match phase {
                RoomPhase::Admin => Some("You own this room"),
                RoomPhase::Member => Some("You are a member of this room"),
                RoomPhase::Pending => Some("Waiting for the owner to approve your request"),
                RoomPhase::NotJoined if self.reconciler.self_id().is_some() => {
                    Some("You are not a member; use 'focusroom join' first")
                }
                _ => None,
            };
            if let Some(text) = text {
                self.notify(Notice::Info(text.to_string()));
            }
        }
    }

    fn on_clock(&mut self, tick: Tick) {
        let phase = self.countdown.phase();
        let bucket = match phase {
            TimerPhase::Running { .. } => tick.remaining.div_ceil(60),
            _ => u64::from(phase.minutes()),
        };
        if self.last_clock != Some((phase.label(), bucket)) {
            self.last_clock = Some((phase.label(), bucket));
            self.notices.push(Notice::Clock(clock_line(phase, tick.remaining)));
        }

        if let Some(completion) = tick.completed {
            tracing::info!(
                "Room {} session of {}m complete",
                completion.room_id,
                completion.minutes
            );
            self.notify(Notice::Info(format!(
                "Focus session of {} minutes complete",
                completion.minutes
            )));
            if let Some(call) = self.dispatcher.plan_completion(&completion) {
                self.spawn_call(call);
            }
        }
    }

    fn on_line(&mut self, line: &str) -> Flow {
        match Command::parse(line) {
            Ok(Some(command)) => self.on_command(command),
            Ok(None) => Flow::Continue,
            Err(usage) => {
                self.notify(Notice::Warn(usage));
                Flow::Continue
            }
        }
    }

    pub fn on_command(&mut self, command: Command) -> Flow {
        match command {
            Command::Act(intent) => self.dispatch(intent),
            Command::Tasks => self.print_tasks(),
            Command::Members => self.print_members(),
            Command::Who => {
                let name = self
                    .dispatcher
                    .user()
                    .map(|u| u.name.clone())
                    .unwrap_or_else(|| "(unknown)".to_string());
                let phase = self.reconciler.phase();
                let connected = if self.channel.is_connected() {
                    "connected"
                } else {
                    "disconnected"
                };
                self.notify(Notice::Info(format!(
                    "{}: {:?}, live updates {}",
                    name, phase, connected
                )));
            }
            Command::Timer => {
                let phase = self.countdown.phase();
                let remaining = self.countdown.remaining();
                self.notices.push(Notice::Clock(clock_line(phase, remaining)));
            }
            Command::Help => {
                for line in HELP.lines() {
                    self.notices.push(Notice::Info(line.to_string()));
                }
            }
            Command::Reconnect => return Flow::Reconnect,
            Command::Leave => return Flow::Leave,
        }
        Flow::Continue
    }

    fn dispatch(&mut self, intent: Intent) {
        match self.dispatcher.plan(intent, &mut self.reconciler) {
            Ok(Planned::Rest(call)) => self.spawn_call(call),
            Ok(Planned::Push(message)) => {
                if !self.channel.send(&message) {
                    self.notify(Notice::Warn("Not connected; message not sent".into()));
                }
            }
            Err(e) => self.notify(Notice::Warn(e.to_string())),
        }
    }

    fn send_presence_join(&mut self) {
        let focus = self.settings.focus.clone();
        if let Ok(Planned::Push(message)) = self
            .dispatcher
            .plan(Intent::PresenceJoin { focus }, &mut self.reconciler)
        {
            self.channel.send(&message);
        }
    }

    fn request_refetch(&mut self) {
        let Some(ticket) = self.reconciler.begin_refetch() else {
            return;
        };
        let api = Arc::clone(&self.api);
        let tx = self.events_tx.clone();
        self.spawn(async move {
            let result = api.get_room(ticket.room_id()).await;
            let _ = tx.send(SessionEvent::Refetched(ticket, result));
        });
    }

    fn reload_personal_tasks(&mut self) {
        let api = Arc::clone(&self.api);
        let tx = self.events_tx.clone();
        self.spawn(async move {
            let _ = tx.send(SessionEvent::PersonalTasks(api.list_personal_tasks().await));
        });
    }

    fn spawn_call(&mut self, call: RestCall) {
        let label = call.label();
        let api = Arc::clone(&self.api);
        let tx = self.events_tx.clone();
        let room_id = self.reconciler.room_id().to_string();
        self.spawn(async move {
            let result = execute(&*api, &room_id, call.clone()).await;
            let _ = tx.send(SessionEvent::ActionFinished {
                label,
                call,
                result,
            });
        });
    }

    fn spawn<F>(&mut self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.inflight.retain(|handle| !handle.is_finished());
        self.inflight.push(tokio::spawn(task));
    }

    /// Say goodbye, drop the snapshot and close the channel.
    async fn leave(&mut self) {
        if !self.reconciler.is_closed() {
            if let Ok(Planned::Push(message)) =
                self.dispatcher.plan(Intent::PresenceLeave, &mut self.reconciler)
            {
                self.channel.send(&message);
            }
            self.reconciler.leave();
        }
        self.notify(Notice::Info(format!(
            "Left room {}",
            self.reconciler.room_id()
        )));
        self.shutdown().await;
    }

    /// Cancel in-flight work, stop ticking and close the channel.
    async fn shutdown(&mut self) {
        for handle in self.inflight.drain(..) {
            handle.abort();
        }
        self.countdown.stop();
        self.ticker.arm(false);
        let channel = std::mem::replace(
            &mut self.channel,
            PushChannel::disconnected(self.reconciler.room_id()),
        );
        channel.close().await;
    }

    fn notify(&mut self, notice: Notice) {
        self.notices.push(notice);
    }

    /// Print buffered notices.
    fn flush(&mut self) {
        for notice in self.notices.drain(..) {
            println!("{}", notice);
        }
    }

    fn print_header(&mut self) {
        let Some(room) = self.reconciler.snapshot() else {
            return;
        };
        let mut lines = vec![format!("{} ({})", room.name, room.room_id)];
        if let Some(description) = room.description.as_deref().filter(|d| !d.trim().is_empty()) {
            lines.push(description.trim().to_string());
        }
        lines.push(format!(
            "Owner: {}  Members: {}  Pending: {}  Tasks: {}",
            room.owner_name.as_deref().unwrap_or("?"),
            room.members.len(),
            room.pending_requests.len(),
            room.tasks.len()
        ));
        self.notices.extend(lines.into_iter().map(Notice::Info));
    }

    fn print_members(&mut self) {
        let Some(room) = self.reconciler.snapshot() else {
            self.notices.push(Notice::Warn("Room is not loaded".into()));
            return;
        };
        let width = room
            .members
            .iter()
            .map(|m| UnicodeWidthStr::width(m.name.as_str()))
            .chain(room.pending_requests.iter().map(|p| UnicodeWidthStr::width(p.name.as_str())))
            .max()
            .unwrap_or(0);
        let mut lines = Vec::new();
        for member in &room.members {
            let role = if room.is_owner(&member.user_id) {
                "owner"
            } else {
                "member"
            };
            lines.push(format!("{}  {}  {}", pad(&member.name, width), role, member.user_id));
        }
        for pending in &room.pending_requests {
            lines.push(format!("{}  pending  {}", pad(&pending.name, width), pending.user_id));
        }
        if self.reconciler.is_owner() {
            for blocked in &room.blocked_users {
                lines.push(format!("{}  blocked", blocked));
            }
        }
        self.notices.extend(lines.into_iter().map(Notice::Info));
    }

    fn print_tasks(&mut self) {
        let tasks = self.reconciler.display_tasks();
        if tasks.is_empty() {
            self.notices.push(Notice::Info("(no tasks)".into()));
            return;
        }
        for task in tasks {
            let mark = if task.status.is_completed() { "x" } else { " " };
            let by = task
                .created_by
                .map(|name| format!(" by {}", name))
                .unwrap_or_default();
            self.notices.push(Notice::Info(format!(
                "[{}] {} ({}{}) {}",
                mark,
                task.title,
                task.source.as_str(),
                by,
                task.id
            )));
        }
    }
}

fn clock_line(phase: TimerPhase, remaining: u64) -> String {
    match phase {
        TimerPhase::Running { minutes, .. } => format!(
            "Timer running: {} left ({:.0}% of {}m)",
            format_clock(remaining),
            progress_percent(remaining, minutes),
            minutes
        ),
        TimerPhase::Paused { .. } => format!("Timer paused at {}", format_clock(remaining)),
        TimerPhase::Stopped { minutes } => format!("Timer stopped ({}m)", minutes),
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Forward stdin lines from a dedicated thread.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        use std::io::BufRead;
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to read input: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::TimerAction;
    use crate::models::{JoinStatus, PushMessage, RoomSnapshot, TimerStatus};
    use crate::room::fake::{Call, FakeApi};
    use serde_json::json;

    fn naive(t: DateTime<Utc>) -> String {
        t.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
    }

    fn room_with_timer(status: &str, start: Option<String>, minutes: u32) -> RoomSnapshot {
        serde_json::from_value(json!({
            "roomId": "r1",
            "name": "Deep Work",
            "ownerId": "u1",
            "ownerName": "Ada",
            "members": [
                {"userId": "u1", "name": "Ada", "status": "admin"},
                {"userId": "u2", "name": "Grace", "status": "member"}
            ],
            "chatHistory": [{"id": "m1", "userId": "u1", "userName": "Ada", "content": "welcome"}],
            "timerStatus": status,
            "timerStartTime": start,
            "timerDuration": minutes
        }))
        .unwrap()
    }

    fn settings() -> SessionSettings {
        SessionSettings {
            ws_url: None,
            token: "fake-token".into(),
            reconnect: ReconnectPolicy::Manual,
            default_minutes: 25,
            focus: None,
        }
    }

    fn session(api: Arc<FakeApi>, user: User) -> RoomSession<FakeApi> {
        RoomSession::new(api, "r1", Some(user), settings())
    }

    impl<A: RoomApi + 'static> RoomSession<A> {
        async fn next_event(&mut self) -> Flow {
            let event = self.events_rx.recv().await.unwrap();
            self.on_event(event)
        }

        fn take_notices(&mut self) -> Vec<Notice> {
            std::mem::take(&mut self.notices)
        }
    }

    #[tokio::test]
    async fn join_then_open_shows_correct_remaining_time() {
        let started = Utc::now() - chrono::Duration::minutes(5);
        let api = Arc::new(
            FakeApi::new(room_with_timer("running", Some(naive(started)), 25))
                .with_join_status(JoinStatus::Member),
        );

        let joined = execute(
            &*api,
            "r1",
            RestCall::Join {
                password: "secret".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(joined, Outcome::Joined(JoinStatus::Member));

        let mut session = session(Arc::clone(&api), User::new("u2", "Grace"));
        session.open().await.unwrap();

        let expected = 20 * 60;
        let remaining = session.countdown().remaining();
        assert!(
            remaining.abs_diff(expected) <= 1,
            "remaining {} expected {}",
            remaining,
            expected
        );
        assert!(session.countdown().is_running());
        assert_eq!(session.reconciler().phase(), RoomPhase::Member);

        let notices = session.take_notices();
        assert!(notices.iter().any(|n| matches!(n, Notice::Chat(m) if m.id == "m1")));
    }

    #[tokio::test]
    async fn invalidation_triggers_refetch_and_resync() {
        let api = Arc::new(FakeApi::new(room_with_timer("stopped", None, 25)));
        let mut session = session(Arc::clone(&api), User::new("u2", "Grace"));
        session.open().await.unwrap();
        assert!(!session.countdown().is_running());

        let started = Utc::now();
        api.set_room(room_with_timer("running", Some(naive(started)), 30));
        session.channel.log().push(PushMessage::TimerUpdate {
            status: Some(TimerStatus::Running),
            start_time: None,
            duration: Some(30),
        });
        assert_eq!(session.on_log_changed(), Flow::Continue);

        // Identity is known, so the next event is the refetch or the task list.
        while !session.countdown().is_running() {
            session.next_event().await;
        }
        assert!(session.countdown().remaining() > 29 * 60);
        let gets = api
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::GetRoom(_)))
            .count();
        assert_eq!(gets, 2);
    }

    #[tokio::test]
    async fn owner_completion_logs_and_resets_once() {
        let started = Utc::now() - chrono::Duration::minutes(26);
        let api = Arc::new(
            FakeApi::new(room_with_timer("running", Some(naive(started)), 25))
                .with_user(User::new("u1", "Ada")),
        );
        let mut session = session(Arc::clone(&api), User::new("u1", "Ada"));
        session.open().await.unwrap();
        assert_eq!(session.countdown().remaining(), 0);

        // Wait for the completion call to report back.
        loop {
            let done = api.calls().contains(&Call::Timer(TimerAction::Reset, 25));
            if done {
                break;
            }
            session.next_event().await;
        }

        // Later ticks on the same run stay quiet.
        session.on_tick(Utc::now());
        session.on_tick(Utc::now());
        tokio::task::yield_now().await;
        let logs = api
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::LogSession(_)))
            .count();
        assert_eq!(logs, 1);
    }

    #[tokio::test]
    async fn member_completion_does_not_log() {
        let started = Utc::now() - chrono::Duration::minutes(30);
        let api = Arc::new(FakeApi::new(room_with_timer(
            "running",
            Some(naive(started)),
            25,
        )));
        let mut session = session(Arc::clone(&api), User::new("u2", "Grace"));
        session.open().await.unwrap();
        session.on_tick(Utc::now());
        // Personal tasks load is the only background call.
        session.next_event().await;
        assert!(!api.calls().iter().any(|c| matches!(c, Call::LogSession(_))));
    }

    #[tokio::test]
    async fn kick_exits_without_refetch() {
        let api = Arc::new(FakeApi::new(room_with_timer("stopped", None, 25)));
        let mut session = session(Arc::clone(&api), User::new("u2", "Grace"));
        session.open().await.unwrap();
        session.take_notices();

        session.channel.log().push(PushMessage::RoomUpdate {
            trigger: Some("kick".into()),
            user_id: Some("u2".into()),
        });
        assert_eq!(session.on_log_changed(), Flow::Exit);
        assert!(session.reconciler().snapshot().is_none());
        let notices = session.take_notices();
        assert!(notices
            .iter()
            .any(|n| *n == Notice::Warn(RemovalKind::Kicked.notice().to_string())));

        session.shutdown().await;
        let gets = api
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::GetRoom(_)))
            .count();
        assert_eq!(gets, 1);
    }

    #[tokio::test]
    async fn expired_token_ends_the_session() {
        let started = Utc::now();
        let api = Arc::new(FakeApi::new(room_with_timer("running", Some(naive(started)), 25)));
        let mut session = session(Arc::clone(&api), User::new("u2", "Grace"));
        session.open().await.unwrap();
        assert!(session.countdown().is_running());
        assert!(session.ticker.is_armed());
        session.take_notices();

        api.expire_token();
        session.channel.log().push(PushMessage::NewTask { task: None });
        assert_eq!(session.on_log_changed(), Flow::Continue);

        // Either the task reload or the refetch reports the rejected token first.
        assert_eq!(session.next_event().await, Flow::Exit);
        assert!(!session.countdown().is_running());
        assert!(!session.ticker.is_armed());
        assert!(session
            .take_notices()
            .iter()
            .any(|n| matches!(n, Notice::Warn(w) if w.contains("focusroom login"))));
        session.shutdown().await;
    }

    #[tokio::test]
    async fn refetch_that_stops_the_timer_disarms_the_ticker() {
        let api = Arc::new(FakeApi::new(room_with_timer("running", Some(naive(Utc::now())), 25)));
        let mut session = session(Arc::clone(&api), User::new("u2", "Grace"));
        session.open().await.unwrap();
        assert!(session.ticker.is_armed());

        api.set_room(room_with_timer("stopped", None, 25));
        session.channel.log().push(PushMessage::TimerUpdate {
            status: Some(TimerStatus::Stopped),
            start_time: None,
            duration: Some(25),
        });
        session.on_log_changed();
        while session.countdown().is_running() {
            session.next_event().await;
        }
        assert!(!session.ticker.is_armed());
    }

    #[tokio::test]
    async fn reconnect_starts_a_fresh_log_and_refetches() {
        use futures::{SinkExt, StreamExt};
        use tokio::net::TcpListener;
        use tokio::sync::oneshot;
        use tokio_tungstenite::tungstenite::Message;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (drop_tx, drop_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let first = tokio_tungstenite::accept_async(tcp).await.unwrap();
            drop_rx.await.unwrap();
            drop(first);

            let (tcp, _) = listener.accept().await.unwrap();
            let mut second = tokio_tungstenite::accept_async(tcp).await.unwrap();
            second
                .send(Message::Text(r#"{"type":"new_task","task":null}"#.into()))
                .await
                .unwrap();
            while let Some(Ok(_)) = second.next().await {}
        });

        let api = Arc::new(FakeApi::new(room_with_timer("stopped", None, 25)));
        let mut settings = settings();
        settings.ws_url = Some(format!("ws://{}/api/ws/room/r1", addr));
        let mut session = RoomSession::new(
            Arc::clone(&api),
            "r1",
            Some(User::new("u2", "Grace")),
            settings,
        );
        session.open().await.unwrap();
        assert_eq!(session.connect_channel().await, None);
        assert!(session.channel.is_connected());

        let mut conn_rx = session.channel.watch_connection();
        drop_tx.send(()).unwrap();
        while *conn_rx.borrow_and_update() {
            conn_rx.changed().await.unwrap();
        }
        // Manual policy: no retry is scheduled.
        assert_eq!(session.on_connection_change(false), None);
        assert_eq!(
            session.on_command(Command::Reconnect),
            Flow::Reconnect
        );

        assert_eq!(session.reconnect().await, None);
        assert!(session.channel.is_connected());
        let mut len_rx = session.channel.log().subscribe();
        while *len_rx.borrow_and_update() < 1 {
            len_rx.changed().await.unwrap();
        }
        session.on_log_changed();
        assert_eq!(session.reconciler().processed(), 1);
        session.on_log_changed();
        assert_eq!(session.reconciler().processed(), 1);

        // Open, the forced refetch after reconnecting, and one for the new task.
        let gets = |api: &FakeApi| {
            api.calls()
                .iter()
                .filter(|c| matches!(c, Call::GetRoom(_)))
                .count()
        };
        while gets(&api) < 3 {
            session.next_event().await;
        }
        assert_eq!(gets(&api), 3);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn failed_toggle_refetches_to_correct_state() {
        let mut room = room_with_timer("stopped", None, 25);
        room.tasks = serde_json::from_value(json!([
            {"id": "t1", "title": "Outline", "status": "todo"}
        ]))
        .unwrap();
        let api = Arc::new(FakeApi::new(room));
        let mut session = session(Arc::clone(&api), User::new("u2", "Grace"));
        session.open().await.unwrap();

        api.fail_next("update_room_task");
        session.on_command(Command::Act(Intent::ToggleTask {
            task_id: "t1".into(),
        }));
        assert!(session.reconciler().snapshot().unwrap().tasks[0]
            .status
            .is_completed());

        // The failure triggers a refetch that restores the server's status.
        while session.reconciler().snapshot().unwrap().tasks[0]
            .status
            .is_completed()
        {
            session.next_event().await;
        }
        assert!(!session.reconciler().snapshot().unwrap().tasks[0]
            .status
            .is_completed());
    }

    #[tokio::test]
    async fn chat_without_connection_warns() {
        let api = Arc::new(FakeApi::new(room_with_timer("stopped", None, 25)));
        let mut session = session(Arc::clone(&api), User::new("u2", "Grace"));
        session.open().await.unwrap();
        session.take_notices();
        assert_eq!(session.on_line("hello there"), Flow::Continue);
        assert_eq!(
            session.take_notices(),
            vec![Notice::Warn("Not connected; message not sent".into())]
        );
    }

    #[tokio::test]
    async fn identity_resolves_after_open() {
        let api = Arc::new(
            FakeApi::new(room_with_timer("stopped", None, 25)).with_user(User::new("u1", "Ada")),
        );
        let mut session = RoomSession::new(Arc::clone(&api), "r1", None, settings());
        session.open().await.unwrap();
        assert_eq!(session.reconciler().phase(), RoomPhase::NotJoined);
        while session.reconciler().self_id().is_none() {
            session.next_event().await;
        }
        assert_eq!(session.reconciler().phase(), RoomPhase::Admin);
    }

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse("   "), Ok(None));
        assert_eq!(
            Command::parse("hi all"),
            Ok(Some(Command::Act(Intent::Chat {
                content: "hi all".into()
            })))
        );
        assert_eq!(
            Command::parse("/start 50"),
            Ok(Some(Command::Act(Intent::StartTimer { minutes: Some(50) })))
        );
        assert_eq!(
            Command::parse("/reset"),
            Ok(Some(Command::Act(Intent::ResetTimer { minutes: None })))
        );
        assert_eq!(
            Command::parse("/kick  Grace Hopper "),
            Ok(Some(Command::Act(Intent::Moderate {
                action: ModerationAction::Kick,
                user: "Grace Hopper".into()
            })))
        );
        assert_eq!(Command::parse("/LEAVE"), Ok(Some(Command::Leave)));
        assert!(Command::parse("/start 0").is_err());
        assert!(Command::parse("/start soon").is_err());
        assert!(Command::parse("/approve").is_err());
        assert!(Command::parse("/dance").is_err());
    }

    #[test]
    fn clock_lines() {
        let running = TimerPhase::Running {
            started_at: Utc::now(),
            minutes: 25,
        };
        assert_eq!(clock_line(running, 750), "Timer running: 12:30 left (50% of 25m)");
        assert_eq!(
            clock_line(TimerPhase::Paused { minutes: 12 }, 720),
            "Timer paused at 12:00"
        );
        assert_eq!(
            clock_line(TimerPhase::Stopped { minutes: 25 }, 1500),
            "Timer stopped (25m)"
        );
    }
}
