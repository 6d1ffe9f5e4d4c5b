//! Task models: shared room tasks, personal tasks, and the merged display row

use serde::{Deserialize, Serialize};

use super::null_as_default;

/// Task progress state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Completed,
}

impl TaskStatus {
    /// Status after a checkbox toggle: anything open becomes completed.
    pub fn toggled(self) -> Self {
        match self {
            TaskStatus::Completed => TaskStatus::Todo,
            TaskStatus::Todo | TaskStatus::InProgress => TaskStatus::Completed,
        }
    }

    pub fn is_completed(self) -> bool {
        self == TaskStatus::Completed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
        }
    }
}

/// Task shared by everyone in a room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomTask {
    pub id: String,
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: TaskStatus,
    #[serde(default)]
    pub assigned_to: Option<String>,
    /// Display name of the creator
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Task from the viewer's private task list (`/api/tasks`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalTask {
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    pub title: String,
    #[serde(rename = "type", default)]
    pub task_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tech_tags: Vec<String>,
    #[serde(default)]
    pub estimated_time: u32,
    #[serde(default)]
    pub total_focused_time: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: TaskStatus,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub scheduled_date: Option<String>,
}

/// Body for `POST /api/tasks`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPersonalTask {
    pub title: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub tech_tags: Vec<String>,
    pub estimated_time: u32,
}

impl NewPersonalTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            task_type: "Study".to_string(),
            tech_tags: Vec::new(),
            estimated_time: 25,
        }
    }
}

/// Where a displayed task lives. Assigned client-side when merging lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSource {
    Room,
    Personal,
}

impl TaskSource {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskSource::Room => "room",
            TaskSource::Personal => "personal",
        }
    }
}

/// One row of the merged room + personal task list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayTask {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    pub source: TaskSource,
    pub created_by: Option<String>,
}

impl From<&RoomTask> for DisplayTask {
    fn from(task: &RoomTask) -> Self {
        Self {
            id: task.id.clone(),
            title: task.title.clone(),
            status: task.status,
            source: TaskSource::Room,
            created_by: Some(task.created_by.clone()).filter(|s| !s.is_empty()),
        }
    }
}

impl From<&PersonalTask> for DisplayTask {
    fn from(task: &PersonalTask) -> Self {
        Self {
            id: task.id.clone(),
            title: task.title.clone(),
            status: task.status,
            source: TaskSource::Personal,
            created_by: None,
        }
    }
}
