//! Feishu Bitable REST client.
//!
//! Uses reqwest to call the `records/search` endpoint of one table,
//! authenticating with a tenant access token from [`TokenCache`].

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use tracing::{debug, warn};

use whitesync_core::config::FeishuConfig;

use super::search::{PageFetcher, QueryError, SearchPage};
use super::token::TokenCache;
use super::types::{ApiEnvelope, SearchData, SearchRequest};
use crate::http::join_url;

/// Error codes meaning the tenant access token is no longer accepted.
const INVALID_TOKEN_CODES: [i64; 2] = [99_991_661, 99_991_663];

/// Client for one Bitable table.
#[derive(Debug, Clone)]
pub struct BitableClient {
    http: reqwest::Client,
    tokens: Arc<TokenCache>,
    search_url: String,
}

impl BitableClient {
    /// Create a client for the table named in `config`.
    pub fn new(http: reqwest::Client, tokens: Arc<TokenCache>, config: &FeishuConfig) -> Self {
        let search_url = join_url(
            &config.base_url,
            &format!(
                "/open-apis/bitable/v1/apps/{}/tables/{}/records/search",
                config.base_id, config.table_id
            ),
        );
        Self {
            http,
            tokens,
            search_url,
        }
    }

    /// URL of the search endpoint, with `page_token` when continuing.
    pub(crate) fn page_url(&self, page_token: Option<&str>) -> Result<Url, QueryError> {
        let mut url = Url::parse(&self.search_url)
            .map_err(|e| QueryError::Api {
                code: -1,
                msg: format!("invalid search URL {}: {e}", self.search_url),
            })?;
        if let Some(token) = page_token {
            url.query_pairs_mut().append_pair("page_token", token);
        }
        Ok(url)
    }
}

#[async_trait]
impl PageFetcher for BitableClient {
    async fn fetch_page(
        &self,
        request: &SearchRequest,
        page_token: Option<&str>,
    ) -> Result<SearchPage, QueryError> {
        let token = self.tokens.get_token().await?;
        let url = self.page_url(page_token)?;
        debug!(url = %url, "Requesting search page");

        let resp = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        let envelope = match resp.json::<ApiEnvelope<SearchData>>().await {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => return Err(QueryError::Status(status.as_u16())),
            Err(e) => return Err(QueryError::Http(e)),
        };

        if let Some(code) = envelope.code.filter(|c| *c != 0) {
            if INVALID_TOKEN_CODES.contains(&code) {
                warn!(code, "Tenant access token rejected, dropping it");
                self.tokens.invalidate().await;
            }
            return Err(QueryError::Api {
                code,
                msg: envelope.msg.unwrap_or_default(),
            });
        }
        if !status.is_success() {
            return Err(QueryError::Status(status.as_u16()));
        }
        if envelope.code.is_none() {
            return Err(QueryError::Api {
                code: -1,
                msg: "response missing code".into(),
            });
        }

        let data = envelope.data.unwrap_or_default();
        Ok(SearchPage {
            items: data.items,
            has_more: data.has_more,
            page_token: data.page_token,
        })
    }
}
