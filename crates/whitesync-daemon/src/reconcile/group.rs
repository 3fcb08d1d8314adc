//! Chat group capabilities used by the reconciler.

use async_trait::async_trait;
use tracing::info;

/// A membership lookup could not give an answer.
#[derive(Debug, thiserror::Error)]
pub enum MembershipError {
    /// The QQ number is not a number the group API accepts.
    #[error("invalid QQ number: {0:?}")]
    InvalidQq(String),

    #[error("membership request failed: {0}")]
    Request(String),

    #[error("group API error (status {status}): {body}")]
    ApiError { status: u16, body: String },
}

/// A group notification could not be delivered.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Request(String),

    #[error("group API error (status {status}): {body}")]
    ApiError { status: u16, body: String },

    #[error("message rejected (retcode {0})")]
    Rejected(i64),
}

/// Answers whether a QQ number currently belongs to the chat group.
#[async_trait]
pub trait MembershipChecker: Send + Sync {
    async fn is_member(&self, qq_number: &str) -> Result<bool, MembershipError>;
}

/// Delivers human-readable run messages.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, message: &str) -> Result<(), NotifyError>;
}

/// Sink that only writes messages to the log, for runs without a chat group.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify(&self, message: &str) -> Result<(), NotifyError> {
        info!(%message, "Notification");
        Ok(())
    }
}
