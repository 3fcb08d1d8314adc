//! OneBot v11 HTTP API client.
//!
//! Only the two actions the reconciler needs: `get_group_member_info` for
//! membership and `send_group_msg` for notifications.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use whitesync_core::config::OneBotConfig;

use crate::http::join_url;
use crate::reconcile::{MembershipChecker, MembershipError, NotificationSink, NotifyError};

/// Response envelope shared by all actions.
#[derive(Debug, Deserialize)]
struct ActionResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    retcode: i64,
    #[serde(default)]
    data: Option<Value>,
}

enum CallError {
    Request(String),
    Api { status: u16, body: String },
}

/// Client for one chat group behind a OneBot HTTP endpoint.
#[derive(Clone)]
pub struct OneBotClient {
    http: reqwest::Client,
    api_url: String,
    access_token: Option<String>,
    group_id: i64,
}

impl std::fmt::Debug for OneBotClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneBotClient")
            .field("api_url", &self.api_url)
            .field("group_id", &self.group_id)
            .finish_non_exhaustive()
    }
}

impl OneBotClient {
    pub fn new(http: reqwest::Client, config: &OneBotConfig) -> Self {
        Self {
            http,
            api_url: config.api_url.clone(),
            access_token: config.access_token.clone().filter(|t| !t.is_empty()),
            group_id: config.group_id,
        }
    }

    async fn call(&self, action: &str, body: &Value) -> Result<ActionResponse, CallError> {
        let mut req = self
            .http
            .post(join_url(&self.api_url, &format!("/{action}")))
            .json(body);
        if let Some(token) = &self.access_token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| CallError::Request(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CallError::Api {
                status: status.as_u16(),
                body,
            });
        }
        resp.json()
            .await
            .map_err(|e| CallError::Request(format!("malformed {action} response: {e}")))
    }
}

#[async_trait]
impl MembershipChecker for OneBotClient {
    #[instrument(skip(self))]
    async fn is_member(&self, qq_number: &str) -> Result<bool, MembershipError> {
        let user_id: i64 = qq_number
            .trim()
            .parse()
            .map_err(|_| MembershipError::InvalidQq(qq_number.to_string()))?;
        let resp = self
            .call(
                "get_group_member_info",
                &json!({"group_id": self.group_id, "user_id": user_id, "no_cache": true}),
            )
            .await
            .map_err(|e| match e {
                CallError::Request(msg) => MembershipError::Request(msg),
                CallError::Api { status, body } => MembershipError::ApiError { status, body },
            })?;

        let member = resp.retcode == 0 && resp.data.as_ref().is_some_and(|d| !d.is_null());
        debug!(
            retcode = resp.retcode,
            status = resp.status.as_deref().unwrap_or(""),
            member,
            "Group member lookup"
        );
        Ok(member)
    }
}

#[async_trait]
impl NotificationSink for OneBotClient {
    async fn notify(&self, message: &str) -> Result<(), NotifyError> {
        let resp = self
            .call(
                "send_group_msg",
                &json!({"group_id": self.group_id, "message": message}),
            )
            .await
            .map_err(|e| match e {
                CallError::Request(msg) => NotifyError::Request(msg),
                CallError::Api { status, body } => NotifyError::ApiError { status, body },
            })?;
        if resp.retcode != 0 {
            return Err(NotifyError::Rejected(resp.retcode));
        }
        Ok(())
    }
}
