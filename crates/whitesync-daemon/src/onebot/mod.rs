//! OneBot v11 group access: membership lookups and group messages.

mod client;

pub use client::OneBotClient;
