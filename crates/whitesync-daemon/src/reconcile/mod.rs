//! Whitelist reconciliation.
//!
//! [`Reconciler`] ties the record search, the filter pipeline, the console
//! correlator and the chat group together. Collaborators are trait objects so
//! runs can be exercised without any remote service.

mod group;
mod orchestrator;
pub mod report;


pub use group::{LogNotifier, MembershipChecker, MembershipError, NotificationSink, NotifyError};
pub use orchestrator::{Listing, ReconcileOptions, Reconciler, RemovalOutcome, NOT_A_MEMBER};
pub use report::{ReconciliationResult, RunOutcome, RunReport};
