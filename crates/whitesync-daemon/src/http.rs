//! Shared reqwest client construction.

use std::time::Duration;

/// Build an HTTP client with a bounded per-request timeout.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    // Ensure a TLS crypto provider is installed (reqwest uses rustls-no-provider).
    // The `Err` case just means it was already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();

    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("whitesync/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Join a base URL and an absolute path, tolerating a trailing slash on the
/// base.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}
