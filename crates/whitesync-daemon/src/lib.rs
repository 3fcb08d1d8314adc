//! whitesync Daemon Library
//!
//! Core functionality for the whitesync daemon:
//! - Feishu Bitable access (tenant token cache, paginated record search)
//! - MCSManager console access with timestamp-window log correlation
//! - OneBot group membership checks and notifications
//! - The reconciliation orchestrator tying them together

pub mod app;
pub mod feishu;
pub mod http;
pub mod mcsm;
pub mod onebot;
pub mod reconcile;
