//! Paginated record search.
//!
//! [`search_all`] drives any [`PageFetcher`] from the first page until the
//! store stops offering more, a page fails, or the page bound is reached.
//! Failures never propagate: whatever was accumulated is returned together
//! with the reason pagination stopped.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use whitesync_core::config::FieldMapping;
use whitesync_core::Record;

use super::token::AuthError;
use super::types::{RawItem, SearchRequest};

/// Failure of a single page request.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("record store returned HTTP {0}")]
    Status(u16),

    #[error("record store error (code {code}): {msg}")]
    Api { code: i64, msg: String },
}

/// One page of search results.
#[derive(Debug, Default, Clone)]
pub struct SearchPage {
    pub items: Vec<RawItem>,
    pub has_more: bool,
    pub page_token: Option<String>,
}

impl SearchPage {
    /// Cursor for the following page, if the store offers one.
    pub fn next_token(&self) -> Option<&str> {
        self.page_token
            .as_deref()
            .filter(|t| self.has_more && !t.is_empty())
    }
}

/// Source of search pages.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch one page; `page_token` is `None` for the first page.
    async fn fetch_page(
        &self,
        request: &SearchRequest,
        page_token: Option<&str>,
    ) -> Result<SearchPage, QueryError>;
}

/// Why pagination ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The store reported no further pages.
    Exhausted,
    /// The page bound was reached while the store still offered more.
    PageLimit,
    /// A page request failed.
    Failed(String),
}

/// Accumulated result of a search.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub items: Vec<RawItem>,
    pub pages_fetched: usize,
    pub stop: StopReason,
}

impl SearchOutcome {
    /// Nothing could be fetched at all: the first page already failed.
    pub const fn is_total_failure(&self) -> bool {
        self.pages_fetched == 0 && matches!(self.stop, StopReason::Failed(_))
    }

    /// Convert the accumulated rows to records.
    pub fn records(&self, fields: &FieldMapping) -> Vec<Record> {
        self.items.iter().map(|item| item.to_record(fields)).collect()
    }
}

/// Fetch pages until exhausted, failed, or `max_pages` pages were fetched.
pub async fn search_all(
    fetcher: &dyn PageFetcher,
    request: &SearchRequest,
    max_pages: usize,
) -> SearchOutcome {
    let mut items = Vec::new();
    let mut pages_fetched = 0;
    let mut token: Option<String> = None;

    let stop = loop {
        if pages_fetched >= max_pages {
            warn!(max_pages, "Page bound reached, returning partial result");
            break StopReason::PageLimit;
        }
        let page = match fetcher.fetch_page(request, token.as_deref()).await {
            Ok(page) => page,
            Err(e) => {
                warn!(page = pages_fetched + 1, error = %e, "Search page failed, stopping pagination");
                break StopReason::Failed(e.to_string());
            }
        };
        pages_fetched += 1;
        debug!(
            page = pages_fetched,
            items = page.items.len(),
            has_more = page.has_more,
            "Fetched search page"
        );

        let next = page.next_token().map(str::to_string);
        items.extend(page.items);
        match next {
            Some(next) => token = Some(next),
            None => break StopReason::Exhausted,
        }
    };

    info!(
        items = items.len(),
        pages = pages_fetched,
        stop = ?stop,
        "Record search finished"
    );
    SearchOutcome {
        items,
        pages_fetched,
        stop,
    }
}
