//! Authentication for the DevFocus API
//!
//! Password login yields a bearer token. Everything downstream receives the
//! token explicitly through [`Credentials`] instead of reading storage itself.

pub mod tokens;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

pub use tokens::StoredToken;

use crate::api::{self, FocusClient};
use crate::config::{Config, ENV_TOKEN};
use crate::models::User;

/// Everything needed to talk to the API as one user.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_url: String,
    pub token: String,
    /// Cached identity; may be missing until `/api/auth/me` resolves.
    pub user: Option<User>,
}

impl Credentials {
    /// Resolve credentials from the environment and the stored config.
    pub fn resolve(config: &Config) -> Result<Self> {
        let api_url = config.api_url();

        if let Some(token) = std::env::var(ENV_TOKEN).ok().filter(|t| !t.trim().is_empty()) {
            tracing::debug!("Using token from {}", ENV_TOKEN);
            return Ok(Self {
                api_url,
                token,
                user: None,
            });
        }

        let stored = config
            .token
            .as_ref()
            .context("Not logged in. Run 'focusroom login' first.")?;
        if stored.is_expired() {
            bail!("Token expired. Run 'focusroom login'.");
        }

        Ok(Self {
            api_url,
            token: stored.token.clone(),
            user: config.user.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
}

/// Log in with email and password, storing the token and identity.
pub async fn login(email: &str, password: &str) -> Result<()> {
    let mut config = Config::load()?;
    let api_url = config.api_url();

    let anonymous = FocusClient::anonymous(&api_url);
    let body = serde_json::json!({ "email": email, "password": password });
    let resp = anonymous.post("/api/auth/login", &body).await?;
    let token: TokenResponse = resp.json().await.context("Failed to parse login response")?;
    if let Some(ref kind) = token.token_type {
        if !kind.eq_ignore_ascii_case("bearer") {
            tracing::warn!("Unexpected token type {}", kind);
        }
    }

    let stored = StoredToken::from_jwt(token.access_token);
    let credentials = Credentials {
        api_url,
        token: stored.token.clone(),
        user: None,
    };
    let user = api::me_data(&FocusClient::new(&credentials)).await?;

    println!("Logged in as {} ({})", user.name, anonymous.base_url());
    config.set_token(stored);
    config.user = Some(user);
    config.save()?;
    Ok(())
}

/// Forget the stored token and identity.
pub async fn logout() -> Result<()> {
    let mut config = Config::load()?;
    config.clear_credentials();
    config.save()?;
    println!("Logged out.");
    Ok(())
}

/// Show current authentication status.
pub async fn status() -> Result<()> {
    let config = Config::load()?;
    println!("API: {}", config.api_url());

    match config.token {
        Some(ref token) if token.is_expired() => println!("Token: expired"),
        Some(ref token) => match token.expires_at {
            Some(exp) => println!("Token: valid (expires at unix {})", exp),
            None => println!("Token: valid"),
        },
        None => println!("Token: none (run 'focusroom login')"),
    }

    if let Some(ref user) = config.user {
        println!("User: {} ({})", user.name, user.id);
    }
    Ok(())
}
