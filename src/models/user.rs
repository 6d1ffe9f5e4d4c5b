//! User-related models

use serde::{Deserialize, Serialize};

/// User profile as returned by `/api/auth/me`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub streak_count: u32,
    #[serde(default)]
    pub total_focus_minutes: u32,
}

impl User {
    #[cfg(test)]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            username: None,
            email: None,
            streak_count: 0,
            total_focus_minutes: 0,
        }
    }
}
