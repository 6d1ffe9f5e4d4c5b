//! Personal task endpoints (`/api/tasks`)

use anyhow::{Context, Result};

use super::client::FocusClient;
use crate::models::{NewPersonalTask, PersonalTask, TaskStatus};

pub async fn list_tasks_data(client: &FocusClient) -> Result<Vec<PersonalTask>> {
    let resp = client.get("/api/tasks", &[]).await?;
    resp.json().await.context("Failed to parse task list")
}

pub async fn create_task_data(client: &FocusClient, task: &NewPersonalTask) -> Result<PersonalTask> {
    let resp = client.post("/api/tasks", task).await?;
    resp.json().await.context("Failed to parse created task")
}

pub async fn update_task_status_data(
    client: &FocusClient,
    task_id: &str,
    status: TaskStatus,
) -> Result<PersonalTask> {
    let body = serde_json::json!({ "status": status });
    let resp = client.patch(&format!("/api/tasks/{}", task_id), &body).await?;
    resp.json().await.context("Failed to parse updated task")
}

/// List personal tasks (prints to stdout).
pub async fn list_tasks(client: &FocusClient) -> Result<()> {
    let tasks = list_tasks_data(client).await?;

    println!("\nTasks:");
    println!("{:-<60}", "");

    if tasks.is_empty() {
        println!("  (no tasks)");
        return Ok(());
    }

    for task in &tasks {
        let mark = if task.status.is_completed() { "x" } else { " " };
        println!("[{}] {} ({}, {}m)", mark, task.title, task.task_type, task.estimated_time);
        println!("    ID: {}", task.id);
    }

    Ok(())
}

/// Create a personal task (prints the new id).
pub async fn add_task(client: &FocusClient, task: &NewPersonalTask) -> Result<()> {
    let created = create_task_data(client, task).await?;
    println!("Task created: {} ({})", created.title, created.id);
    Ok(())
}

/// Mark a personal task completed.
pub async fn complete_task(client: &FocusClient, task_id: &str) -> Result<()> {
    let updated = update_task_status_data(client, task_id, TaskStatus::Completed).await?;
    println!("Completed: {}", updated.title);
    Ok(())
}
