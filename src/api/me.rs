//! User profile endpoint (`/api/auth/me`)

use anyhow::{Context, Result};

use super::client::FocusClient;
use crate::models::User;

/// Fetch the identity behind the current token.
pub async fn me_data(client: &FocusClient) -> Result<User> {
    let resp = client.get("/api/auth/me", &[]).await?;
    resp.json().await.context("Failed to parse /api/auth/me response")
}

/// Fetch and display current user info.
pub async fn whoami(client: &FocusClient) -> Result<()> {
    let me = me_data(client).await?;

    println!();
    println!("Name:        {}", me.name);
    println!("Email:       {}", me.email.as_deref().unwrap_or("(none)"));
    println!("Streak:      {} days", me.streak_count);
    println!("Focus total: {} min", me.total_focus_minutes);
    println!("ID:          {}", me.id);

    Ok(())
}
