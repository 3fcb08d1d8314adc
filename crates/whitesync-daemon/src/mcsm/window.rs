//! Timestamp-window extraction from the console output buffer.
//!
//! Console lines carry only a wall-clock `[HH:MM:SS]` prefix. The calendar
//! date comes from the remote time reported alongside the buffer, in the
//! console's UTC offset. Untimed lines (stack traces, wrapped output) inherit
//! the last timestamp seen above them.

use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset, NaiveTime, TimeZone};
use regex::Regex;

/// A parsed time this far ahead of the buffer time belongs to the day before.
const ROLLOVER_THRESHOLD_MS: i64 = 12 * 60 * 60 * 1000;
const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Matches `[10:00:03]` as well as the `[10:00:03 INFO]` form servers print.
static TIME_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"\[(\d{2}:\d{2}:\d{2})[\]\s]").expect("time prefix pattern is a valid regex")
});

/// A dispatched command and the remote-clock window its output must fall in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub command: String,
    /// Remote acceptance time (epoch ms).
    pub issued_at: i64,
    pub window_start: i64,
    pub window_end: i64,
}

impl CommandInvocation {
    /// `None` when the window bounds do not fit in an `i64`.
    pub fn new(
        command: impl Into<String>,
        issued_at: i64,
        before_ms: i64,
        after_ms: i64,
    ) -> Option<Self> {
        Some(Self {
            command: command.into(),
            issued_at,
            window_start: issued_at.checked_sub(before_ms)?,
            window_end: issued_at.checked_add(after_ms)?,
        })
    }

    /// Inclusive on both ends.
    pub const fn contains(&self, timestamp: i64) -> bool {
        self.window_start <= timestamp && timestamp <= self.window_end
    }
}

/// One console line with its carried-forward timestamp (epoch ms).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub raw: String,
    pub timestamp: Option<i64>,
}

/// Split `data` into lines and assign absolute timestamps.
///
/// `buffer_time` is the remote time (epoch ms) at which the buffer was read.
/// Lines before the first parseable prefix have no timestamp.
pub fn parse_lines(data: &str, buffer_time: i64, offset: FixedOffset) -> Vec<LogLine> {
    let Some(buffer_at) = DateTime::from_timestamp_millis(buffer_time) else {
        return data
            .lines()
            .map(|raw| LogLine {
                raw: raw.to_string(),
                timestamp: None,
            })
            .collect();
    };
    let date = buffer_at.with_timezone(&offset).date_naive();

    let mut carried = None;
    data.lines()
        .map(|raw| {
            if let Some(ts) = line_time(raw).and_then(|time| {
                offset
                    .from_local_datetime(&date.and_time(time))
                    .single()
                    .map(|dt| dt.timestamp_millis())
            }) {
                carried = Some(if ts - buffer_time > ROLLOVER_THRESHOLD_MS {
                    ts - DAY_MS
                } else {
                    ts
                });
            }
            LogLine {
                raw: raw.to_string(),
                timestamp: carried,
            }
        })
        .collect()
}

fn line_time(raw: &str) -> Option<NaiveTime> {
    let caps = TIME_PREFIX_RE.captures(raw)?;
    NaiveTime::parse_from_str(caps.get(1)?.as_str(), "%H:%M:%S").ok()
}

/// Lines whose carried timestamp falls inside the invocation window, in
/// buffer order.
pub fn extract_window(lines: &[LogLine], invocation: &CommandInvocation) -> Vec<String> {
    lines
        .iter()
        .filter(|line| line.timestamp.is_some_and(|ts| invocation.contains(ts)))
        .map(|line| line.raw.clone())
        .collect()
}
