//! Authenticated HTTP client for the DevFocus API
//!
//! Wraps reqwest::Client with bearer-token injection and uniform error reporting.

use anyhow::{bail, Context, Result};
use serde::Serialize;

use crate::auth::Credentials;

/// The server rejected the bearer token. The session is over until the user logs in again.
#[derive(Debug, thiserror::Error)]
#[error("401 Unauthorized for {url}. Token may be invalid -- run 'focusroom login'.")]
pub struct AuthExpired {
    pub url: String,
}

impl AuthExpired {
    /// Whether `err`, or anything it wraps, is a rejected token.
    pub fn is(err: &anyhow::Error) -> bool {
        err.downcast_ref::<AuthExpired>().is_some()
    }
}

/// Client bound to one API base URL and one bearer token.
pub struct FocusClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl FocusClient {
    pub fn new(credentials: &Credentials) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: credentials.api_url.trim_end_matches('/').to_string(),
            token: Some(credentials.token.clone()),
        }
    }

    /// Client for the login endpoint, before any token exists.
    pub fn anonymous(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token.as_deref() {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// GET with optional query parameters.
    pub async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<reqwest::Response> {
        let url = self.url(path);
        tracing::debug!("GET {}", url);

        let resp = self
            .authorize(self.http.get(&url).query(query))
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        check_response(resp, &url).await
    }

    /// POST with a JSON body.
    pub async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response> {
        let url = self.url(path);
        tracing::debug!("POST {}", url);

        let resp = self
            .authorize(self.http.post(&url).json(body))
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        check_response(resp, &url).await
    }

    /// POST whose arguments travel in the query string (room moderation and timer).
    pub async fn post_query(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response> {
        let url = self.url(path);
        tracing::debug!("POST {} {:?}", url, query);

        let resp = self
            .authorize(self.http.post(&url).query(query))
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        check_response(resp, &url).await
    }

    /// PATCH with a JSON body.
    pub async fn patch<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response> {
        let url = self.url(path);
        tracing::debug!("PATCH {}", url);

        let resp = self
            .authorize(self.http.patch(&url).json(body))
            .send()
            .await
            .with_context(|| format!("PATCH {} failed", url))?;

        check_response(resp, &url).await
    }
}

/// Check HTTP response status code and return a clear error on failure.
async fn check_response(resp: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(AuthExpired {
            url: url.to_string(),
        }
        .into());
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("HTTP {} for {}: {}", status.as_u16(), url, error_detail(&body));
    }
    Ok(resp)
}

/// FastAPI error bodies look like `{"detail": "..."}`; fall back to the raw text.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| match v.get("detail") {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
            None => None,
        })
        .unwrap_or_else(|| body.to_string())
}
