//! MCSManager instance API client.
//!
//! Two endpoints of one protected instance: `command` to send a console line
//! and `outputlog` to read the tail of the console output buffer.

use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use whitesync_core::config::McsmConfig;

use crate::http::join_url;

const COMMAND_PATH: &str = "/api/protected_instance/command";
const OUTPUT_LOG_PATH: &str = "/api/protected_instance/outputlog";

/// Sending a console command failed; the command may not have run.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("command request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("panel returned status {0}")]
    Status(u16),

    #[error("malformed command response: {0}")]
    Malformed(String),

    #[error("invalid panel URL: {0}")]
    InvalidUrl(String),
}

/// Reading the console output buffer failed.
#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("log request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("panel returned status {0}")]
    Status(u16),

    #[error("malformed log response: {0}")]
    Malformed(String),

    #[error("invalid panel URL: {0}")]
    InvalidUrl(String),
}

/// Tail of the console output and the remote time it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogBuffer {
    /// Remote time (epoch ms).
    pub time: i64,
    pub data: String,
}

#[derive(Debug, Deserialize)]
struct PanelResponse<T> {
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    data: Option<T>,
    #[serde(default)]
    time: Option<i64>,
}

/// Client for one MCSManager instance.
#[derive(Clone)]
pub struct McsmClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    uuid: String,
    daemon_id: String,
    log_size: String,
}

impl std::fmt::Debug for McsmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McsmClient")
            .field("api_url", &self.api_url)
            .field("api_key", &"<redacted>")
            .field("uuid", &self.uuid)
            .field("daemon_id", &self.daemon_id)
            .finish_non_exhaustive()
    }
}

impl McsmClient {
    pub fn new(http: reqwest::Client, config: &McsmConfig) -> Self {
        Self {
            http,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            uuid: config.uuid.clone(),
            daemon_id: config.daemon_id.clone(),
            log_size: config.log_size.clone(),
        }
    }

    /// Instance endpoint URL with the identifying query parameters.
    fn endpoint(&self, path: &str) -> Result<Url, String> {
        let raw = join_url(&self.api_url, path);
        let mut url = Url::parse(&raw).map_err(|e| format!("{raw}: {e}"))?;
        url.query_pairs_mut()
            .append_pair("apikey", &self.api_key)
            .append_pair("uuid", &self.uuid)
            .append_pair("daemonId", &self.daemon_id);
        Ok(url)
    }

    /// Send `command` to the console; returns the remote acceptance time
    /// (epoch ms).
    pub async fn dispatch(&self, command: &str) -> Result<i64, DispatchError> {
        let mut url = self
            .endpoint(COMMAND_PATH)
            .map_err(DispatchError::InvalidUrl)?;
        url.query_pairs_mut().append_pair("command", command);
        debug!(command, "Dispatching console command");

        let resp = self
            .http
            .post(url)
            .header("X-Requested-With", "XMLHttpRequest")
            .header(reqwest::header::CONTENT_TYPE, "application/json; charset=utf-8")
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DispatchError::Status(status.as_u16()));
        }

        let body: PanelResponse<serde_json::Value> = resp
            .json()
            .await
            .map_err(|e| DispatchError::Malformed(e.to_string()))?;
        if let Some(code) = body.status.filter(|s| *s != 200) {
            return Err(DispatchError::Status(code));
        }
        body.time
            .ok_or_else(|| DispatchError::Malformed("missing time".into()))
    }

    /// Read the tail of the console output buffer.
    pub async fn fetch_log(&self) -> Result<LogBuffer, ConsoleError> {
        let mut url = self
            .endpoint(OUTPUT_LOG_PATH)
            .map_err(ConsoleError::InvalidUrl)?;
        url.query_pairs_mut().append_pair("size", &self.log_size);

        let resp = self
            .http
            .get(url)
            .header("X-Requested-With", "XMLHttpRequest")
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ConsoleError::Status(status.as_u16()));
        }

        let body: PanelResponse<String> = resp
            .json()
            .await
            .map_err(|e| ConsoleError::Malformed(e.to_string()))?;
        if let Some(code) = body.status.filter(|s| *s != 200) {
            return Err(ConsoleError::Status(code));
        }
        let time = body
            .time
            .ok_or_else(|| ConsoleError::Malformed("missing time".into()))?;
        Ok(LogBuffer {
            time,
            data: body.data.unwrap_or_default(),
        })
    }
}
