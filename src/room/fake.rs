//! In-memory `RoomApi` for tests

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::api::{AuthExpired, ModerationAction, RoomApi, TimerAction};
use crate::models::{
    JoinStatus, NewPersonalTask, NewRoom, PersonalTask, RoomSnapshot, RoomTask, TaskStatus,
    User,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Me,
    GetRoom(String),
    CreateRoom(String),
    Join(String),
    Moderate(ModerationAction, String),
    Timer(TimerAction, u32),
    LogSession(u32),
    CreateRoomTask(String),
    UpdateRoomTask(String, TaskStatus),
    ListPersonal,
    CreatePersonal(String),
    UpdatePersonal(String, TaskStatus),
}

pub struct FakeApi {
    room: Mutex<RoomSnapshot>,
    user: User,
    join_status: JoinStatus,
    personal: Mutex<Vec<PersonalTask>>,
    calls: Mutex<Vec<Call>>,
    failing: Mutex<HashSet<&'static str>>,
    expired: AtomicBool,
}

impl FakeApi {
    pub fn new(room: RoomSnapshot) -> Self {
        Self {
            room: Mutex::new(room),
            user: User::new("u2", "Grace"),
            join_status: JoinStatus::Member,
            personal: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            expired: AtomicBool::new(false),
        }
    }

    pub fn with_user(mut self, user: User) -> Self {
        self.user = user;
        self
    }

    pub fn with_join_status(mut self, status: JoinStatus) -> Self {
        self.join_status = status;
        self
    }

    /// Make the next call to `method` fail.
    pub fn fail_next(&self, method: &'static str) {
        self.failing.lock().unwrap().insert(method);
    }

    /// Reject every call from now on as if the token had expired.
    pub fn expire_token(&self) {
        self.expired.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_room(&self, room: RoomSnapshot) {
        *self.room.lock().unwrap() = room;
    }

    fn record(&self, method: &'static str, call: Call) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.expired.load(Ordering::SeqCst) {
            return Err(AuthExpired {
                url: format!("fake://{}", method),
            }
            .into());
        }
        if self.failing.lock().unwrap().remove(method) {
            return Err(anyhow!("{} failed: HTTP 400", method));
        }
        Ok(())
    }
}

#[async_trait]
impl RoomApi for FakeApi {
    async fn me(&self) -> Result<User> {
        self.record("me", Call::Me)?;
        Ok(self.user.clone())
    }

    async fn get_room(&self, room_id: &str) -> Result<RoomSnapshot> {
        self.record("get_room", Call::GetRoom(room_id.to_string()))?;
        Ok(self.room.lock().unwrap().clone())
    }

    async fn create_room(&self, room: &NewRoom) -> Result<RoomSnapshot> {
        self.record("create_room", Call::CreateRoom(room.name.clone()))?;
        let mut created = self.room.lock().unwrap().clone();
        created.name = room.name.clone();
        Ok(created)
    }

    async fn join_room(&self, _room_id: &str, password: &str) -> Result<JoinStatus> {
        self.record("join_room", Call::Join(password.to_string()))?;
        Ok(self.join_status)
    }

    async fn moderate(
        &self,
        _room_id: &str,
        action: ModerationAction,
        member_id: &str,
    ) -> Result<()> {
        self.record("moderate", Call::Moderate(action, member_id.to_string()))
    }

    async fn control_timer(&self, _room_id: &str, action: TimerAction, minutes: u32) -> Result<()> {
        self.record("control_timer", Call::Timer(action, minutes))
    }

    async fn log_session(&self, _room_id: &str, minutes: u32) -> Result<()> {
        self.record("log_session", Call::LogSession(minutes))
    }

    async fn create_room_task(&self, _room_id: &str, title: &str) -> Result<RoomTask> {
        self.record("create_room_task", Call::CreateRoomTask(title.to_string()))?;
        Ok(RoomTask {
            id: format!("t-{}", title),
            title: title.to_string(),
            status: TaskStatus::Todo,
            assigned_to: None,
            created_by: self.user.name.clone(),
            created_at: None,
        })
    }

    async fn update_room_task(
        &self,
        _room_id: &str,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<()> {
        self.record(
            "update_room_task",
            Call::UpdateRoomTask(task_id.to_string(), status),
        )
    }

    async fn list_personal_tasks(&self) -> Result<Vec<PersonalTask>> {
        self.record("list_personal_tasks", Call::ListPersonal)?;
        Ok(self.personal.lock().unwrap().clone())
    }

    async fn create_personal_task(&self, task: &NewPersonalTask) -> Result<PersonalTask> {
        self.record("create_personal_task", Call::CreatePersonal(task.title.clone()))?;
        let created = PersonalTask {
            id: format!("p-{}", task.title),
            user_id: self.user.id.clone(),
            title: task.title.clone(),
            task_type: task.task_type.clone(),
            tech_tags: task.tech_tags.clone(),
            estimated_time: task.estimated_time,
            total_focused_time: 0,
            status: TaskStatus::Todo,
            created_at: None,
            updated_at: None,
            scheduled_date: None,
        };
        self.personal.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn update_personal_task(&self, task_id: &str, status: TaskStatus) -> Result<PersonalTask> {
        self.record(
            "update_personal_task",
            Call::UpdatePersonal(task_id.to_string(), status),
        )?;
        let mut personal = self.personal.lock().unwrap();
        let task = personal
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| anyhow!("Task not found"))?;
        task.status = status;
        Ok(task.clone())
    }
}
