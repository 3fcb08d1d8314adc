//! Reconciliation runs.
//!
//! A run searches the record store, cleans the result through the filter
//! pipeline, then processes the surviving records one at a time: optional
//! group membership check, console command, classification. Messages go to
//! the notification sink; their delivery never affects the outcome.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, instrument, warn};

use whitesync_core::config::FieldMapping;
use whitesync_core::{Config, FilterPipeline, Record};

use super::group::{MembershipChecker, NotificationSink};
use super::report::{
    applicant_list, success_list, ReconciliationResult, RunOutcome, RunReport,
};
use crate::feishu::{search_all, PageFetcher, SearchOutcome, SearchRequest, StopReason};
use crate::mcsm::{Console, ConsoleOutput, DispatchError};

/// Failure reason for records whose submitter is not in the group.
pub const NOT_A_MEMBER: &str = "not a member";

const GAME_ID_PLACEHOLDER: &str = "{game_id}";

/// Policy for a [`Reconciler`].
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Search used by the add and list flows.
    pub search: SearchRequest,
    pub fields: FieldMapping,
    pub page_size: u32,
    pub max_pages: usize,
    pub membership_check: bool,
    pub add_command: String,
    pub remove_command: String,
}

impl ReconcileOptions {
    pub fn from_config(config: &Config) -> Self {
        let feishu = &config.feishu;
        Self {
            search: SearchRequest::all_of(feishu.conditions.clone(), &feishu.fields, feishu.page_size),
            fields: feishu.fields.clone(),
            page_size: feishu.page_size,
            max_pages: feishu.max_pages,
            membership_check: config.reconcile.membership_check,
            add_command: config.reconcile.add_command.clone(),
            remove_command: config.reconcile.remove_command.clone(),
        }
    }
}

/// Result of removing a departed member's player from the whitelist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalOutcome {
    Removed { game_id: String, output: String },
    /// No valid submission is on record for the QQ number.
    NotFound,
    QueryFailed(String),
    DispatchFailed { game_id: String, reason: String },
}

/// Records the listing flow found, after filtering.
#[derive(Debug, Clone)]
pub struct Listing {
    pub records: Vec<Record>,
    pub fetched: usize,
    pub stop: StopReason,
}

/// Drives reconciliation runs against injected collaborators.
pub struct Reconciler {
    records: Arc<dyn PageFetcher>,
    console: Arc<dyn Console>,
    membership: Option<Arc<dyn MembershipChecker>>,
    notifier: Arc<dyn NotificationSink>,
    pipeline: FilterPipeline,
    options: ReconcileOptions,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("pipeline", &self.pipeline)
            .field("options", &self.options)
            .field("has_membership", &self.membership.is_some())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        records: Arc<dyn PageFetcher>,
        console: Arc<dyn Console>,
        notifier: Arc<dyn NotificationSink>,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            records,
            console,
            membership: None,
            notifier,
            pipeline: FilterPipeline::standard(),
            options,
        }
    }

    /// Attach the group membership lookup used when the check is enabled.
    #[must_use]
    pub fn with_membership(mut self, checker: Arc<dyn MembershipChecker>) -> Self {
        self.membership = Some(checker);
        self
    }

    async fn search(&self, request: &SearchRequest) -> SearchOutcome {
        search_all(self.records.as_ref(), request, self.options.max_pages).await
    }

    /// Best-effort group message.
    async fn notify(&self, message: &str) {
        if let Err(e) = self.notifier.notify(message).await {
            warn!(error = %e, "Failed to deliver notification");
        }
    }

    /// Whether `record` passes the membership gate.
    async fn admitted(&self, record: &Record) -> bool {
        if !self.options.membership_check {
            return true;
        }
        let Some(checker) = &self.membership else {
            warn!("Membership check enabled without a group client, refusing record");
            return false;
        };
        match checker.is_member(&record.qq_number).await {
            Ok(member) => member,
            Err(e) => {
                warn!(qq = %record.qq_number, error = %e, "Membership lookup failed");
                false
            }
        }
    }

    async fn apply(&self, template: &str, game_id: &str) -> Result<ConsoleOutput, DispatchError> {
        self.console
            .run(&template.replace(GAME_ID_PLACEHOLDER, game_id))
            .await
    }

    /// Whitelist every approved submission.
    ///
    /// Records are processed strictly in order. `shutdown` is checked before
    /// each record; once it reads `true` the remaining records are skipped.
    #[instrument(skip_all)]
    pub async fn add_approved(&self, shutdown: &watch::Receiver<bool>) -> RunReport {
        let search = self.search(&self.options.search).await;
        let fetched = search.items.len();

        if search.is_total_failure() {
            let reason = match &search.stop {
                StopReason::Failed(reason) => reason.clone(),
                other => format!("{other:?}"),
            };
            return self
                .finish(RunReport {
                    outcome: RunOutcome::QueryFailed(reason),
                    fetched,
                    filtered: 0,
                    stop: search.stop,
                    cancelled: false,
                })
                .await;
        }
        if fetched == 0 {
            return self
                .finish(RunReport {
                    outcome: RunOutcome::NoRecords,
                    fetched,
                    filtered: 0,
                    stop: search.stop,
                    cancelled: false,
                })
                .await;
        }

        let records = self.pipeline.run(search.records(&self.options.fields)).records;
        let filtered = records.len();
        if records.is_empty() {
            return self
                .finish(RunReport {
                    outcome: RunOutcome::NoValidRecords,
                    fetched,
                    filtered,
                    stop: search.stop,
                    cancelled: false,
                })
                .await;
        }

        self.notify(&applicant_list(&records)).await;

        let mut result = ReconciliationResult::default();
        let mut cancelled = false;
        for record in &records {
            if *shutdown.borrow() {
                info!(remaining = records.len() - result.total(), "Shutdown requested, stopping run");
                cancelled = true;
                break;
            }
            if !self.admitted(record).await {
                info!(qq = %record.qq_number, game_id = %record.game_id, "Submitter not in group");
                result.fail(record, NOT_A_MEMBER);
                continue;
            }
            match self.apply(&self.options.add_command, &record.game_id).await {
                Ok(output) => {
                    info!(game_id = %record.game_id, output = %output.text(), "Whitelisted player");
                    result.succeed(record);
                }
                Err(e) => {
                    warn!(game_id = %record.game_id, error = %e, "Whitelist command failed");
                    result.fail(record, e.to_string());
                }
            }
        }

        if !result.succeeded.is_empty() {
            self.notify(&success_list(&result.succeeded)).await;
        }
        self.finish(RunReport {
            outcome: RunOutcome::Completed(result),
            fetched,
            filtered,
            stop: search.stop,
            cancelled,
        })
        .await
    }

    async fn finish(&self, report: RunReport) -> RunReport {
        info!(
            fetched = report.fetched,
            filtered = report.filtered,
            succeeded = report.result().map_or(0, |r| r.succeeded.len()),
            failed = report.result().map_or(0, |r| r.failed.len()),
            cancelled = report.cancelled,
            "Reconciliation run finished"
        );
        self.notify(&report.summary()).await;
        report
    }

    /// Remove the player registered by `qq_number`, e.g. after they left the
    /// group.
    #[instrument(skip(self))]
    pub async fn remove_member(&self, qq_number: &str) -> RemovalOutcome {
        let qq_number = qq_number.trim();
        let request = SearchRequest::by_qq_number(qq_number, &self.options.fields, self.options.page_size);
        let search = self.search(&request).await;
        if search.is_total_failure() {
            let reason = match &search.stop {
                StopReason::Failed(reason) => reason.clone(),
                other => format!("{other:?}"),
            };
            self.notify(&format!(
                "Could not look up the submission of departed member {qq_number}: {reason}"
            ))
            .await;
            return RemovalOutcome::QueryFailed(reason);
        }

        let records = self.pipeline.run(search.records(&self.options.fields)).records;
        let Some(record) = records.iter().find(|r| r.qq_number == qq_number) else {
            info!("No whitelist entry on record for departed member");
            self.notify(&format!(
                "Member {qq_number} left the group, but has no submission on record"
            ))
            .await;
            return RemovalOutcome::NotFound;
        };

        let game_id = record.game_id.clone();
        match self.apply(&self.options.remove_command, &game_id).await {
            Ok(output) => {
                self.notify(&format!(
                    "Member {qq_number} left the group, removed {game_id} from the whitelist"
                ))
                .await;
                RemovalOutcome::Removed {
                    game_id,
                    output: output.text(),
                }
            }
            Err(e) => {
                warn!(game_id = %game_id, error = %e, "Whitelist removal failed");
                self.notify(&format!(
                    "Member {qq_number} left the group, but removing {game_id} failed: {e}"
                ))
                .await;
                RemovalOutcome::DispatchFailed {
                    game_id,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Approved submissions as the add flow would see them, without applying
    /// anything.
    pub async fn list(&self) -> Listing {
        let search = self.search(&self.options.search).await;
        let fetched = search.items.len();
        let records = self.pipeline.run(search.records(&self.options.fields)).records;
        Listing {
            records,
            fetched,
            stop: search.stop,
        }
    }

    /// Run an arbitrary console command.
    pub async fn console(&self, command: &str) -> Result<ConsoleOutput, DispatchError> {
        self.console.run(command).await
    }
}
