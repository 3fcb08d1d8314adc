//! `whitesync` Core Library
//!
//! Shared functionality for whitesync components:
//! - Approval submission records and their validity rules
//! - The record filter pipeline (validation, format check, deduplication)
//! - Configuration loading
//! - Common error types

pub mod config;
pub mod error;
pub mod filters;
pub mod record;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use filters::{FilterPipeline, PipelineOutcome};
pub use record::Record;
