//! Feishu Bitable integration.
//!
//! Provides the tenant access token cache, a reqwest-based client for the
//! `records/search` endpoint, and the bounded pagination loop that gathers
//! approval submissions.

mod client;
pub mod search;
pub mod token;
pub mod types;

#[cfg(test)]
mod tests;

pub use client::BitableClient;
pub use search::{search_all, PageFetcher, QueryError, SearchOutcome, SearchPage, StopReason};
pub use token::{AuthError, Credential, TokenCache};
pub use types::{RawItem, SearchRequest};
