//! Tests for the Bitable client, wire types and pagination.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use httpmock::{Method::POST, MockServer};
use serde_json::json;

use whitesync_core::config::{FeishuConfig, FieldMapping};

use super::client::BitableClient;
use super::search::{search_all, PageFetcher, QueryError, SearchPage, StopReason};
use super::token::TokenCache;
use super::types::{cell_number, cell_text, ApiEnvelope, RawItem, SearchData, SearchRequest};
use crate::http::test_support::{can_bind_localhost, client};

// =============================================================================
// Scripted page source
// =============================================================================

/// Replays a fixed list of page results and records the tokens it was asked
/// for. Once the script runs out it keeps claiming more pages.
#[derive(Default)]
struct ScriptedFetcher {
    pages: Mutex<VecDeque<Result<SearchPage, QueryError>>>,
    seen_tokens: Mutex<Vec<Option<String>>>,
}

impl ScriptedFetcher {
    fn new(pages: Vec<Result<SearchPage, QueryError>>) -> Self {
        Self {
            pages: Mutex::new(pages.into()),
            seen_tokens: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.seen_tokens.lock().unwrap().len()
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch_page(
        &self,
        _request: &SearchRequest,
        page_token: Option<&str>,
    ) -> Result<SearchPage, QueryError> {
        let mut seen = self.seen_tokens.lock().unwrap();
        seen.push(page_token.map(str::to_string));
        let n = seen.len();
        drop(seen);
        self.pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                let id = format!("endless-{n}");
                let token = format!("t{n}");
                Ok(page(&[id.as_str()], true, Some(token.as_str())))
            })
    }
}

fn item(id: &str) -> RawItem {
    RawItem {
        record_id: Some(id.to_string()),
        ..RawItem::default()
    }
}

fn page(ids: &[&str], has_more: bool, token: Option<&str>) -> SearchPage {
    SearchPage {
        items: ids.iter().map(|id| item(id)).collect(),
        has_more,
        page_token: token.map(str::to_string),
    }
}

fn request() -> SearchRequest {
    SearchRequest::all_of(Vec::new(), &FieldMapping::default(), 50)
}

fn ids(items: &[RawItem]) -> Vec<String> {
    items
        .iter()
        .map(|i| i.record_id.clone().unwrap_or_default())
        .collect()
}

// =============================================================================
// Pagination
// =============================================================================

#[tokio::test]
async fn pagination_is_bounded_against_endless_upstream() {
    let fetcher = ScriptedFetcher::default();
    let outcome = search_all(&fetcher, &request(), 100).await;

    assert_eq!(outcome.stop, StopReason::PageLimit);
    assert_eq!(outcome.pages_fetched, 100);
    assert_eq!(fetcher.calls(), 100);
    assert_eq!(outcome.items.len(), 100);
    assert_eq!(outcome.items[0].record_id.as_deref(), Some("endless-1"));
    assert_eq!(outcome.items[99].record_id.as_deref(), Some("endless-100"));
}

#[tokio::test]
async fn pagination_follows_page_tokens() {
    let fetcher = ScriptedFetcher::new(vec![
        Ok(page(&["a", "b"], true, Some("p2"))),
        Ok(page(&["c"], true, Some("p3"))),
        Ok(page(&["d"], false, None)),
    ]);
    let outcome = search_all(&fetcher, &request(), 100).await;

    assert_eq!(outcome.stop, StopReason::Exhausted);
    assert_eq!(ids(&outcome.items), vec!["a", "b", "c", "d"]);
    assert_eq!(
        *fetcher.seen_tokens.lock().unwrap(),
        vec![None, Some("p2".to_string()), Some("p3".to_string())]
    );
}

#[tokio::test]
async fn has_more_false_stops_even_with_token() {
    let fetcher = ScriptedFetcher::new(vec![Ok(page(&["a"], false, Some("ignored")))]);
    let outcome = search_all(&fetcher, &request(), 100).await;
    assert_eq!(outcome.stop, StopReason::Exhausted);
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn missing_or_empty_token_stops_pagination() {
    let fetcher = ScriptedFetcher::new(vec![Ok(page(&["a"], true, None))]);
    let outcome = search_all(&fetcher, &request(), 100).await;
    assert_eq!(outcome.stop, StopReason::Exhausted);
    assert_eq!(fetcher.calls(), 1);

    let fetcher = ScriptedFetcher::new(vec![Ok(page(&["a"], true, Some("")))]);
    let outcome = search_all(&fetcher, &request(), 100).await;
    assert_eq!(outcome.stop, StopReason::Exhausted);
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn page_failure_returns_partial_result() {
    let fetcher = ScriptedFetcher::new(vec![
        Ok(page(&["a", "b"], true, Some("p2"))),
        Err(QueryError::Status(502)),
    ]);
    let outcome = search_all(&fetcher, &request(), 100).await;

    assert_eq!(ids(&outcome.items), vec!["a", "b"]);
    assert_eq!(outcome.pages_fetched, 1);
    assert!(matches!(outcome.stop, StopReason::Failed(ref m) if m.contains("502")));
    assert!(!outcome.is_total_failure());
}

#[tokio::test]
async fn first_page_failure_is_total() {
    let fetcher = ScriptedFetcher::new(vec![Err(QueryError::Api {
        code: 1_254_004,
        msg: "WrongTableId".into(),
    })]);
    let outcome = search_all(&fetcher, &request(), 100).await;
    assert!(outcome.items.is_empty());
    assert!(outcome.is_total_failure());
}

// =============================================================================
// Cell extraction
// =============================================================================

#[test]
fn text_cells_concatenate_segments() {
    let cell = json!([{"text": "Steve", "type": "text"}, {"text": "_01", "type": "text"}]);
    assert_eq!(cell_text(&cell).as_deref(), Some("Steve_01"));
    assert_eq!(cell_text(&json!("plain")).as_deref(), Some("plain"));
    assert_eq!(cell_text(&json!(12345)).as_deref(), Some("12345"));
    assert_eq!(cell_text(&json!([])), None);
    assert_eq!(cell_text(&json!(null)), None);
    assert_eq!(cell_text(&json!(true)), None);
}

#[test]
fn number_cells_accept_formula_shape() {
    assert_eq!(cell_number(&json!({"type": 2, "value": [88]})), Some(88.0));
    assert_eq!(cell_number(&json!(91.5)), Some(91.5));
    assert_eq!(cell_number(&json!("76")), Some(76.0));
    assert_eq!(cell_number(&json!([{"text": "80"}])), Some(80.0));
    assert_eq!(cell_number(&json!({"type": 2, "value": []})), None);
    assert_eq!(cell_number(&json!("n/a")), None);
}

#[test]
fn raw_item_converts_to_trimmed_record() {
    let raw: RawItem = serde_json::from_value(json!({
        "record_id": "recA",
        "created_time": 1_700_000_000_000_i64,
        "fields": {
            "QQ号码": [{"text": " 10001 ", "type": "text"}],
            "游戏ID": [{"text": "Steve\n", "type": "text"}],
            "总分": {"type": 2, "value": [90]},
            "提交时间": 1_699_999_000_000_i64
        }
    }))
    .unwrap();
    let record = raw.to_record(&FieldMapping::default());
    assert_eq!(record.external_id, "recA");
    assert_eq!(record.qq_number, "10001");
    assert_eq!(record.game_id, "Steve");
    assert_eq!(record.score, Some(90.0));
    assert_eq!(record.submitted_at, Some(1_699_999_000_000));
    assert_eq!(record.created_time, 1_700_000_000_000);
}

#[test]
fn raw_item_with_missing_fields_fails_closed() {
    let raw: RawItem = serde_json::from_value(json!({"fields": {"游戏ID": {"weird": 1}}})).unwrap();
    let record = raw.to_record(&FieldMapping::default());
    assert_eq!(record.external_id, "");
    assert_eq!(record.qq_number, "");
    assert_eq!(record.game_id, "");
    assert!(record.score.is_none());
    assert_eq!(record.created_time, 0);
    assert!(!record.is_valid());
}

#[test]
fn search_response_tolerates_null_items() {
    let env: ApiEnvelope<SearchData> = serde_json::from_value(json!({
        "code": 0,
        "msg": "success",
        "data": {"items": null, "has_more": false, "total": 0}
    }))
    .unwrap();
    let data = env.data.unwrap();
    assert!(data.items.is_empty());
    assert!(!data.has_more);
    assert!(data.page_token.is_none());
}

#[test]
fn search_request_serializes_filter_verbatim() {
    let req = SearchRequest::by_qq_number("10001", &FieldMapping::default(), 20);
    let body = serde_json::to_value(&req).unwrap();
    assert_eq!(body["filter"]["conjunction"], "and");
    assert_eq!(body["filter"]["conditions"][0]["field_name"], "QQ号码");
    assert_eq!(body["filter"]["conditions"][0]["operator"], "is");
    assert_eq!(body["filter"]["conditions"][0]["value"][0], "10001");
    assert_eq!(body["page_size"], 20);
    assert_eq!(body["automatic_fields"], true);
    assert_eq!(body["field_names"].as_array().unwrap().len(), 4);
}

// =============================================================================
// HTTP client
// =============================================================================

fn config_for(server: &MockServer) -> FeishuConfig {
    FeishuConfig {
        base_url: server.base_url(),
        app_id: "app".into(),
        app_secret: "secret".into(),
        base_id: "bascnX".into(),
        table_id: "tblY".into(),
        ..FeishuConfig::default()
    }
}

const SEARCH_PATH: &str = "/open-apis/bitable/v1/apps/bascnX/tables/tblY/records/search";

async fn mock_token(server: &MockServer) {
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/open-apis/auth/v3/tenant_access_token/internal");
            then.status(200)
                .json_body(json!({"code": 0, "tenant_access_token": "t-1", "expire": 7200}));
        })
        .await;
}

fn bitable(server: &MockServer) -> BitableClient {
    let config = config_for(server);
    let tokens = Arc::new(TokenCache::new(
        client(),
        &config.base_url,
        &config.app_id,
        &config.app_secret,
        None,
    ));
    BitableClient::new(client(), tokens, &config)
}

#[test]
fn page_url_appends_token_only_when_continuing() {
    let config = FeishuConfig {
        base_url: "https://open.feishu.cn/".into(),
        base_id: "b".into(),
        table_id: "t".into(),
        ..FeishuConfig::default()
    };
    let tokens = Arc::new(TokenCache::new(client(), &config.base_url, "a", "s", None));
    let c = BitableClient::new(client(), tokens, &config);
    assert_eq!(
        c.page_url(None).unwrap().as_str(),
        "https://open.feishu.cn/open-apis/bitable/v1/apps/b/tables/t/records/search"
    );
    assert!(c
        .page_url(Some("abc=="))
        .unwrap()
        .as_str()
        .ends_with("records/search?page_token=abc%3D%3D"));
}

#[tokio::test]
async fn fetch_page_sends_bearer_and_body() {
    if !can_bind_localhost() {
        return;
    }
    let server = MockServer::start_async().await;
    mock_token(&server).await;
    let search = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(SEARCH_PATH)
                .header("authorization", "Bearer t-1")
                .body_includes("\"page_size\":50")
                .body_includes("\"conjunction\":\"and\"");
            then.status(200).json_body(json!({
                "code": 0,
                "data": {
                    "items": [
                        {"record_id": "r1", "fields": {"QQ号码": [{"text": "1"}], "游戏ID": [{"text": "Steve"}]}},
                        {"record_id": "r2", "fields": {}}
                    ],
                    "has_more": false
                }
            }));
        })
        .await;

    let c = bitable(&server);
    let outcome = search_all(&c, &request(), 100).await;
    search.assert_async().await;

    assert_eq!(outcome.stop, StopReason::Exhausted);
    let records = outcome.records(&FieldMapping::default());
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].game_id, "Steve");
}

#[tokio::test]
async fn nonzero_code_is_a_query_error() {
    if !can_bind_localhost() {
        return;
    }
    let server = MockServer::start_async().await;
    mock_token(&server).await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(SEARCH_PATH);
            then.status(200)
                .json_body(json!({"code": 1_254_004, "msg": "WrongTableId"}));
        })
        .await;

    let err = bitable(&server)
        .fetch_page(&request(), None)
        .await
        .unwrap_err();
    assert!(
        matches!(err, QueryError::Api { code: 1_254_004, .. }),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn body_without_code_is_a_query_error() {
    if !can_bind_localhost() {
        return;
    }
    let server = MockServer::start_async().await;
    mock_token(&server).await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(SEARCH_PATH);
            then.status(200)
                .json_body(json!({"data": {"items": [], "has_more": false}}));
        })
        .await;

    let err = bitable(&server)
        .fetch_page(&request(), None)
        .await
        .unwrap_err();
    assert!(
        matches!(err, QueryError::Api { code: -1, .. }),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn server_error_without_json_is_a_status_error() {
    if !can_bind_localhost() {
        return;
    }
    let server = MockServer::start_async().await;
    mock_token(&server).await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(SEARCH_PATH);
            then.status(503).body("upstream unavailable");
        })
        .await;

    let err = bitable(&server)
        .fetch_page(&request(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::Status(503)), "unexpected error: {err}");
}

#[tokio::test]
async fn auth_failure_surfaces_as_query_error() {
    if !can_bind_localhost() {
        return;
    }
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/open-apis/auth/v3/tenant_access_token/internal");
            then.status(200)
                .json_body(json!({"code": 10003, "msg": "invalid app_id"}));
        })
        .await;

    let outcome = search_all(&bitable(&server), &request(), 100).await;
    assert!(outcome.is_total_failure());
    assert!(matches!(outcome.stop, StopReason::Failed(ref m) if m.contains("authentication")));
}
