//! API client module for the DevFocus server

pub mod client;
mod me;
mod rooms;
mod tasks;

use anyhow::Result;
use async_trait::async_trait;

pub use client::{AuthExpired, FocusClient};
pub use me::{me_data, whoami};
pub use rooms::{list_rooms, ModerationAction, TimerAction};
pub(crate) use rooms::pad;
pub use tasks::{add_task, complete_task, list_tasks};

use crate::models::{
    JoinStatus, NewPersonalTask, NewRoom, PersonalTask, RoomSnapshot, RoomTask, TaskStatus, User,
};

/// The slice of the REST surface a room session depends on.
///
/// Implemented by [`FocusClient`]; tests substitute in-memory fakes.
#[async_trait]
pub trait RoomApi: Send + Sync {
    async fn me(&self) -> Result<User>;
    async fn get_room(&self, room_id: &str) -> Result<RoomSnapshot>;
    async fn create_room(&self, room: &NewRoom) -> Result<RoomSnapshot>;
    async fn join_room(&self, room_id: &str, password: &str) -> Result<JoinStatus>;
    async fn moderate(&self, room_id: &str, action: ModerationAction, member_id: &str)
        -> Result<()>;
    async fn control_timer(&self, room_id: &str, action: TimerAction, minutes: u32)
        -> Result<()>;
    async fn log_session(&self, room_id: &str, minutes: u32) -> Result<()>;
    async fn create_room_task(&self, room_id: &str, title: &str) -> Result<RoomTask>;
    async fn update_room_task(&self, room_id: &str, task_id: &str, status: TaskStatus)
        -> Result<()>;
    async fn list_personal_tasks(&self) -> Result<Vec<PersonalTask>>;
    async fn create_personal_task(&self, task: &NewPersonalTask) -> Result<PersonalTask>;
    async fn update_personal_task(&self, task_id: &str, status: TaskStatus)
        -> Result<PersonalTask>;
}

#[async_trait]
impl RoomApi for FocusClient {
    async fn me(&self) -> Result<User> {
        me::me_data(self).await
    }

    async fn get_room(&self, room_id: &str) -> Result<RoomSnapshot> {
        rooms::get_room_data(self, room_id).await
    }

    async fn create_room(&self, room: &NewRoom) -> Result<RoomSnapshot> {
        rooms::create_room_data(self, room).await
    }

    async fn join_room(&self, room_id: &str, password: &str) -> Result<JoinStatus> {
        rooms::join_room_data(self, room_id, password).await
    }

    async fn moderate(
        &self,
        room_id: &str,
        action: ModerationAction,
        member_id: &str,
    ) -> Result<()> {
        rooms::moderate_data(self, room_id, action, member_id).await
    }

    async fn control_timer(&self, room_id: &str, action: TimerAction, minutes: u32) -> Result<()> {
        rooms::control_timer_data(self, room_id, action, minutes).await
    }

    async fn log_session(&self, room_id: &str, minutes: u32) -> Result<()> {
        rooms::log_session_data(self, room_id, minutes).await
    }

    async fn create_room_task(&self, room_id: &str, title: &str) -> Result<RoomTask> {
        rooms::create_room_task_data(self, room_id, title).await
    }

    async fn update_room_task(
        &self,
        room_id: &str,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<()> {
        rooms::update_room_task_data(self, room_id, task_id, status).await
    }

    async fn list_personal_tasks(&self) -> Result<Vec<PersonalTask>> {
        tasks::list_tasks_data(self).await
    }

    async fn create_personal_task(&self, task: &NewPersonalTask) -> Result<PersonalTask> {
        tasks::create_task_data(self, task).await
    }

    async fn update_personal_task(&self, task_id: &str, status: TaskStatus) -> Result<PersonalTask> {
        tasks::update_task_status_data(self, task_id, status).await
    }
}
