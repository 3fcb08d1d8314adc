//! Command/log correlation.
//!
//! The panel API does not return a command's output. [`McsmConsole`] sends the
//! command, waits for the server to act on it, reads the output buffer, and
//! keeps the lines stamped inside the command's time window.

use std::time::Duration;

use async_trait::async_trait;
use chrono::FixedOffset;
use tracing::{debug, info, instrument, warn};

use whitesync_core::config::McsmConfig;

use super::client::{DispatchError, McsmClient};
use super::window::{extract_window, parse_lines, CommandInvocation};

/// Text reported in place of output when the log could not be read.
pub const OUTPUT_UNAVAILABLE: &str = "output unavailable";

/// How the output of a dispatched command was established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correlation {
    /// At least one line fell inside the window.
    Matched,
    /// The log was read but nothing fell inside the window.
    Gap,
    /// The log could not be read.
    LogUnavailable(String),
}

/// Result of a dispatched command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleOutput {
    pub invocation: CommandInvocation,
    pub lines: Vec<String>,
    pub correlation: Correlation,
}

impl ConsoleOutput {
    /// Output for display.
    pub fn text(&self) -> String {
        match self.correlation {
            Correlation::LogUnavailable(_) => OUTPUT_UNAVAILABLE.to_string(),
            _ => self.lines.join("\n"),
        }
    }
}

/// A game server console that runs commands.
///
/// `Ok` means the command was accepted, whatever became of its output.
#[async_trait]
pub trait Console: Send + Sync {
    async fn run(&self, command: &str) -> Result<ConsoleOutput, DispatchError>;
}

/// [`Console`] backed by an MCSManager instance.
#[derive(Debug, Clone)]
pub struct McsmConsole {
    client: McsmClient,
    settle_delay: Duration,
    window_before_ms: i64,
    window_after_ms: i64,
    offset: FixedOffset,
}

impl McsmConsole {
    pub fn new(client: McsmClient, config: &McsmConfig) -> Self {
        let offset = config
            .utc_offset_secs
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| *chrono::Local::now().offset());
        Self {
            client,
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            window_before_ms: config.window_before_ms,
            window_after_ms: config.window_after_ms,
            offset,
        }
    }
}

#[async_trait]
impl Console for McsmConsole {
    #[instrument(skip(self))]
    async fn run(&self, command: &str) -> Result<ConsoleOutput, DispatchError> {
        let issued_at = self.client.dispatch(command).await?;
        let invocation = CommandInvocation::new(
            command,
            issued_at,
            self.window_before_ms,
            self.window_after_ms,
        )
        .ok_or_else(|| DispatchError::Malformed(format!("acceptance time {issued_at} out of range")))?;
        debug!(issued_at, "Command accepted, waiting for output");
        tokio::time::sleep(self.settle_delay).await;

        let buffer = match self.client.fetch_log().await {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!(error = %e, "Command dispatched but output log unavailable");
                return Ok(ConsoleOutput {
                    invocation,
                    lines: Vec::new(),
                    correlation: Correlation::LogUnavailable(e.to_string()),
                });
            }
        };

        let lines = extract_window(&parse_lines(&buffer.data, buffer.time, self.offset), &invocation);
        let correlation = if lines.is_empty() {
            info!("No console output inside the command window");
            Correlation::Gap
        } else {
            Correlation::Matched
        };
        Ok(ConsoleOutput {
            invocation,
            lines,
            correlation,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use httpmock::{
        Method::{GET, POST},
        MockServer,
    };
    use serde_json::json;

    use super::*;
    use crate::http::test_support::{can_bind_localhost, client};

    /// 2024-01-01T10:00:00Z
    const TEN_AM: i64 = 1_704_103_200_000;

    fn console(server: &MockServer) -> McsmConsole {
        let config = McsmConfig {
            api_url: server.base_url(),
            api_key: "key".into(),
            uuid: "inst".into(),
            daemon_id: "dmn".into(),
            settle_delay_ms: 0,
            utc_offset_secs: Some(0),
            ..McsmConfig::default()
        };
        McsmConsole::new(McsmClient::new(client(), &config), &config)
    }

    async fn mock_command(server: &MockServer, time: i64) {
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/protected_instance/command");
                then.status(200).json_body(json!({"status": 200, "time": time}));
            })
            .await;
    }

    #[test]
    fn text_reports_unavailable_log() {
        let out = ConsoleOutput {
            invocation: CommandInvocation::new("list", 0, 0, 0).unwrap(),
            lines: Vec::new(),
            correlation: Correlation::LogUnavailable("HTTP 502".into()),
        };
        assert_eq!(out.text(), OUTPUT_UNAVAILABLE);
    }

    #[tokio::test]
    async fn run_returns_lines_inside_window() {
        if !can_bind_localhost() {
            return;
        }
        let server = MockServer::start_async().await;
        mock_command(&server, TEN_AM + 2000).await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/protected_instance/outputlog");
                then.status(200).json_body(json!({
                    "status": 200,
                    "data": "[09:59:50] old\n[10:00:02] Added Steve to the whitelist\n  detail\n[10:00:09] later",
                    "time": TEN_AM + 9500
                }));
            })
            .await;

        let out = console(&server).run("whitelist add Steve").await.unwrap();
        assert_eq!(out.correlation, Correlation::Matched);
        assert_eq!(out.text(), "[10:00:02] Added Steve to the whitelist\n  detail");
        assert_eq!(out.invocation.window_start, TEN_AM + 1000);
        assert_eq!(out.invocation.window_end, TEN_AM + 7000);
    }

    #[tokio::test]
    async fn run_reports_gap_when_nothing_matches() {
        if !can_bind_localhost() {
            return;
        }
        let server = MockServer::start_async().await;
        mock_command(&server, TEN_AM + 2000).await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/protected_instance/outputlog");
                then.status(200)
                    .json_body(json!({"status": 200, "data": "no timestamps here", "time": TEN_AM + 3000}));
            })
            .await;

        let out = console(&server).run("list").await.unwrap();
        assert_eq!(out.correlation, Correlation::Gap);
        assert!(out.lines.is_empty());
    }

    #[tokio::test]
    async fn log_failure_still_counts_as_dispatched() {
        if !can_bind_localhost() {
            return;
        }
        let server = MockServer::start_async().await;
        mock_command(&server, TEN_AM).await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/protected_instance/outputlog");
                then.status(502);
            })
            .await;

        let out = console(&server).run("list").await.unwrap();
        assert!(matches!(out.correlation, Correlation::LogUnavailable(_)));
        assert_eq!(out.text(), OUTPUT_UNAVAILABLE);
    }

    #[tokio::test]
    async fn out_of_range_acceptance_time_is_malformed() {
        if !can_bind_localhost() {
            return;
        }
        let server = MockServer::start_async().await;
        mock_command(&server, i64::MIN).await;
        let log = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/protected_instance/outputlog");
                then.status(200).json_body(json!({"status": 200, "data": "", "time": 0}));
            })
            .await;

        let err = console(&server).run("list").await.unwrap_err();
        assert!(matches!(err, DispatchError::Malformed(_)), "{err}");
        log.assert_calls(0);
    }

    #[tokio::test]
    async fn dispatch_failure_skips_log_fetch() {
        if !can_bind_localhost() {
            return;
        }
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/protected_instance/command");
                then.status(500);
            })
            .await;
        let log = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/protected_instance/outputlog");
                then.status(200).json_body(json!({"status": 200, "data": "", "time": 0}));
            })
            .await;

        let err = console(&server).run("list").await.unwrap_err();
        assert!(matches!(err, DispatchError::Status(500)), "{err}");
        log.assert_calls(0);
    }
}
