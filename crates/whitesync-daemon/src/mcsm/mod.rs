//! MCSManager console access.
//!
//! [`McsmClient`] talks to the panel's instance API; [`McsmConsole`] layers
//! timestamp-window correlation on top so a command's own output can be
//! picked out of the shared console buffer.

mod client;
mod console;
mod window;

pub use client::{ConsoleError, DispatchError, LogBuffer, McsmClient};
pub use console::{Console, ConsoleOutput, Correlation, McsmConsole, OUTPUT_UNAVAILABLE};
pub use window::{extract_window, parse_lines, CommandInvocation, LogLine};
