//! Tenant access token cache.
//!
//! Holds the Feishu `tenant_access_token`, refreshes it when it is within
//! [`REFRESH_MARGIN_SECS`] of expiring, and persists it to a small JSON file so
//! a restart does not force a new token request.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::http::join_url;

/// A credential is refreshed this many seconds before it expires.
pub const REFRESH_MARGIN_SECS: i64 = 60;

/// Lifetime assumed when the credential endpoint omits `expire`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 7200;

const TOKEN_PATH: &str = "/open-apis/auth/v3/tenant_access_token/internal";

/// Credential acquisition errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credential request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("credential endpoint returned HTTP {0}")]
    Status(u16),

    #[error("credential rejected (code {code}): {msg}")]
    Rejected { code: i64, msg: String },

    #[error("credential response missing tenant_access_token")]
    MissingToken,

    #[error("credential lifetime out of range: {0}s")]
    InvalidExpiry(i64),
}

/// A bearer token with its validity window (unix seconds).
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub expires_at: i64,
    pub fetched_at: i64,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("fetched_at", &self.fetched_at)
            .finish()
    }
}

impl Credential {
    /// Usable iff `now < expires_at - margin`.
    pub const fn is_usable_at(&self, now: i64) -> bool {
        now < self.expires_at.saturating_sub(REFRESH_MARGIN_SECS)
    }
}

/// On-disk shape of the persisted token.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedToken {
    access_token: String,
    expires_at: i64,
    updated_at: i64,
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    app_id: &'a str,
    app_secret: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    tenant_access_token: Option<String>,
    #[serde(default)]
    expire: Option<i64>,
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Caches the tenant access token and refreshes it on demand.
///
/// Refresh happens while holding the cache lock, so concurrent callers never
/// issue more than one credential request at a time.
pub struct TokenCache {
    http: reqwest::Client,
    token_url: String,
    app_id: String,
    app_secret: String,
    path: Option<PathBuf>,
    current: Mutex<Option<Credential>>,
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("token_url", &self.token_url)
            .field("app_id", &self.app_id)
            .field("app_secret", &"<redacted>")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl TokenCache {
    /// Create a cache, loading a persisted credential from `path` if it is
    /// still valid beyond the refresh margin.
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        app_id: impl Into<String>,
        app_secret: impl Into<String>,
        path: Option<PathBuf>,
    ) -> Self {
        let loaded = path
            .as_deref()
            .and_then(|p| load_persisted(p, now_secs()));
        if loaded.is_some() {
            info!("Reusing persisted tenant access token");
        }
        Self {
            http,
            token_url: join_url(base_url, TOKEN_PATH),
            app_id: app_id.into(),
            app_secret: app_secret.into(),
            path,
            current: Mutex::new(loaded),
        }
    }

    /// Return a usable token, refreshing it first if needed.
    pub async fn get_token(&self) -> Result<String, AuthError> {
        let mut current = self.current.lock().await;
        let now = now_secs();
        if let Some(cred) = current.as_ref().filter(|c| c.is_usable_at(now)) {
            return Ok(cred.token.clone());
        }

        debug!("Tenant access token missing or near expiry, refreshing");
        let fresh = self.fetch(now).await?;
        if let Some(path) = &self.path {
            if let Err(e) = persist(path, &fresh) {
                warn!(path = %path.display(), error = %e, "Failed to persist tenant access token");
            }
        }
        let token = fresh.token.clone();
        *current = Some(fresh);
        Ok(token)
    }

    /// Drop the in-memory credential so the next call refreshes it.
    pub async fn invalidate(&self) {
        *self.current.lock().await = None;
    }

    async fn fetch(&self, now: i64) -> Result<Credential, AuthError> {
        let resp = self
            .http
            .post(&self.token_url)
            .json(&TokenRequest {
                app_id: &self.app_id,
                app_secret: &self.app_secret,
            })
            .send()
            .await?;

        let status = resp.status();
        // Feishu reports bad credentials with a JSON body even on HTTP 4xx.
        let parsed = match resp.json::<TokenResponse>().await {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => return Err(AuthError::Status(status.as_u16())),
            Err(e) => return Err(AuthError::Http(e)),
        };
        if parsed.code != 0 {
            return Err(AuthError::Rejected {
                code: parsed.code,
                msg: parsed.msg.unwrap_or_default(),
            });
        }
        if !status.is_success() {
            return Err(AuthError::Status(status.as_u16()));
        }

        let token = parsed
            .tenant_access_token
            .filter(|t| !t.trim().is_empty())
            .ok_or(AuthError::MissingToken)?;
        let expires_in = parsed.expire.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let expires_at = now
            .checked_add(expires_in)
            .ok_or(AuthError::InvalidExpiry(expires_in))?;
        info!(expires_in, "Fetched new tenant access token");
        Ok(Credential {
            token,
            expires_at,
            fetched_at: now,
        })
    }
}

/// Read a persisted credential; stale, unreadable or malformed state counts
/// as absent.
fn load_persisted(path: &Path, now: i64) -> Option<Credential> {
    let content = std::fs::read_to_string(path).ok()?;
    let persisted: PersistedToken = match serde_json::from_str(&content) {
        Ok(p) => p,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring malformed token file");
            return None;
        }
    };
    let cred = Credential {
        token: persisted.access_token,
        expires_at: persisted.expires_at,
        fetched_at: persisted.updated_at,
    };
    (!cred.token.is_empty() && cred.is_usable_at(now)).then_some(cred)
}

/// Write the credential via a temp file and rename, so readers never observe
/// a half-written file.
fn persist(path: &Path, cred: &Credential) -> std::io::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let body = serde_json::to_vec_pretty(&PersistedToken {
        access_token: cred.token.clone(),
        expires_at: cred.expires_at,
        updated_at: cred.fetched_at,
    })?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, path)
}
