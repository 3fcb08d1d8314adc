//! Run results and the messages sent about them.

use std::fmt::Write as _;

use serde::Serialize;

use whitesync_core::Record;

use crate::feishu::StopReason;

/// A record whose command was accepted by the console.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Applied {
    pub qq_number: String,
    pub game_id: String,
}

/// A record that was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejected {
    pub qq_number: String,
    pub game_id: String,
    pub reason: String,
}

/// Per-record classification of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationResult {
    pub succeeded: Vec<Applied>,
    pub failed: Vec<Rejected>,
}

impl ReconciliationResult {
    pub(crate) fn succeed(&mut self, record: &Record) {
        self.succeeded.push(Applied {
            qq_number: record.qq_number.clone(),
            game_id: record.game_id.clone(),
        });
    }

    pub(crate) fn fail(&mut self, record: &Record, reason: impl Into<String>) {
        self.failed.push(Rejected {
            qq_number: record.qq_number.clone(),
            game_id: record.game_id.clone(),
            reason: reason.into(),
        });
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Not even the first page could be fetched.
    QueryFailed(String),
    NoRecords,
    NoValidRecords,
    Completed(ReconciliationResult),
}

/// Outcome of one add run with the counts behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub fetched: usize,
    pub filtered: usize,
    pub stop: StopReason,
    /// Shutdown was requested before every record was processed.
    pub cancelled: bool,
}

impl RunReport {
    pub const fn result(&self) -> Option<&ReconciliationResult> {
        match &self.outcome {
            RunOutcome::Completed(result) => Some(result),
            _ => None,
        }
    }

    /// One-message summary of the run.
    pub fn summary(&self) -> String {
        let mut msg = match &self.outcome {
            RunOutcome::QueryFailed(reason) => {
                format!("Whitelist sync failed: could not query submissions ({reason})")
            }
            RunOutcome::NoRecords => "Whitelist sync: no approved submissions found".to_string(),
            RunOutcome::NoValidRecords => format!(
                "Whitelist sync: {} submission(s) found, none valid after filtering",
                self.fetched
            ),
            RunOutcome::Completed(result) => {
                let mut msg = format!(
                    "Whitelist sync finished: {} submission(s), {} after filtering, {} added, {} failed",
                    self.fetched,
                    self.filtered,
                    result.succeeded.len(),
                    result.failed.len()
                );
                for failure in &result.failed {
                    let _ = write!(
                        msg,
                        "\n- {} (QQ {}): {}",
                        failure.game_id, failure.qq_number, failure.reason
                    );
                }
                msg
            }
        };
        match &self.stop {
            StopReason::PageLimit => msg.push_str("\nNote: page limit reached, results may be incomplete"),
            StopReason::Failed(reason) if !matches!(self.outcome, RunOutcome::QueryFailed(_)) => {
                let _ = write!(msg, "\nNote: search stopped early ({reason})");
            }
            _ => {}
        }
        if self.cancelled {
            msg.push_str("\nNote: run was interrupted before all records were processed");
        }
        msg
    }
}

/// Records about to be processed.
pub fn applicant_list(records: &[Record]) -> String {
    let mut msg = format!("Whitelist applicants ({}):", records.len());
    for record in records {
        let _ = write!(
            msg,
            "\n- {} (QQ {}, score {})",
            record.game_id,
            record.qq_number,
            record.score_display()
        );
    }
    msg
}

/// Players added in this run.
pub fn success_list(applied: &[Applied]) -> String {
    let mut msg = format!("Whitelisted ({}):", applied.len());
    for entry in applied {
        let _ = write!(msg, "\n- {} (QQ {})", entry.game_id, entry.qq_number);
    }
    msg
}
