//! Configuration and credential storage

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::auth::StoredToken;
use crate::models::{User, DEFAULT_TIMER_MINUTES};
use crate::push::ReconnectPolicy;

/// API server used when nothing else is configured
pub const DEFAULT_API_URL: &str = "http://localhost:8001";

/// Environment override for the API base URL
pub const ENV_API_URL: &str = "FOCUSROOM_API_URL";
/// Environment override for the bearer token
pub const ENV_TOKEN: &str = "FOCUSROOM_TOKEN";

/// Application configuration
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// DevFocus API base URL (the push endpoint is derived from it)
    pub api_url: Option<String>,
    /// Bearer token from the last login
    pub token: Option<StoredToken>,
    /// Identity cached from `/api/auth/me`
    pub user: Option<User>,
    /// Timer length offered by `/start` and `/reset` without an argument
    pub default_timer_minutes: Option<u32>,
    /// Behaviour when a room connection drops
    pub reconnect: Option<ReconnectPolicy>,
}

impl Config {
    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "devfocus", "focusroom")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        Self::from_toml(&content)
    }

    fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir).context("Failed to create config directory")?;

        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).context("Failed to write config file")?;

        // Set restrictive permissions on config file (contains tokens)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }

    /// API base URL: environment, then file, then the local default.
    pub fn api_url(&self) -> String {
        std::env::var(ENV_API_URL)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn timer_minutes(&self) -> u32 {
        self.default_timer_minutes
            .filter(|m| *m > 0)
            .unwrap_or(DEFAULT_TIMER_MINUTES)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        self.reconnect.unwrap_or_default()
    }

    pub fn set_token(&mut self, token: StoredToken) {
        self.token = Some(token);
    }

    pub fn clear_credentials(&mut self) {
        self.token = None;
        self.user = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.timer_minutes(), 25);
        assert_eq!(config.reconnect_policy(), ReconnectPolicy::Manual);
        assert!(config.token.is_none());
    }

    #[test]
    fn parses_settings_and_cached_identity() {
        let config = Config::from_toml(
            r#"
api_url = "https://focus.example.com/"
default_timer_minutes = 50
reconnect = "backoff"

[token]
token = "abc"
expires_at = 4102444800

[user]
id = "u1"
name = "Ada"
"#,
        )
        .unwrap();
        assert_eq!(config.timer_minutes(), 50);
        assert_eq!(config.reconnect_policy(), ReconnectPolicy::Backoff);
        assert_eq!(config.user.as_ref().map(|u| u.name.as_str()), Some("Ada"));
        assert_eq!(config.token.as_ref().map(|t| t.token.as_str()), Some("abc"));
    }
}
