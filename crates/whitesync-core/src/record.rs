//! Whitelist approval submissions.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Accepted shape of a game id.
pub const GAME_ID_PATTERN: &str = r"^[0-9A-Za-z_]{3,16}$";

static GAME_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(GAME_ID_PATTERN).expect("game id pattern is a valid regex")
});

/// One approval submission read from the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Opaque id assigned by the record store.
    pub external_id: String,
    pub qq_number: String,
    pub game_id: String,
    /// Total score of the application questionnaire, when present and numeric.
    #[serde(default)]
    pub score: Option<f64>,
    /// Submission time in epoch milliseconds.
    #[serde(default)]
    pub submitted_at: Option<i64>,
    /// Record creation time in epoch milliseconds; 0 when the store omitted it.
    #[serde(default)]
    pub created_time: i64,
}

impl Record {
    /// Both identifiers are present after trimming.
    pub fn has_identity(&self) -> bool {
        !self.qq_number.trim().is_empty() && !self.game_id.trim().is_empty()
    }

    /// The game id matches [`GAME_ID_PATTERN`].
    pub fn has_wellformed_game_id(&self) -> bool {
        is_valid_game_id(&self.game_id)
    }

    /// A record is usable for the whitelist only if it has both identifiers
    /// and a well-formed game id.
    pub fn is_valid(&self) -> bool {
        self.has_identity() && self.has_wellformed_game_id()
    }

    /// Human-readable score, `"unknown"` when absent.
    pub fn score_display(&self) -> String {
        self.score
            .map_or_else(|| "unknown".to_string(), |score| format!("{score}"))
    }
}

/// Check a game id against [`GAME_ID_PATTERN`].
pub fn is_valid_game_id(game_id: &str) -> bool {
    GAME_ID_RE.is_match(game_id)
}
