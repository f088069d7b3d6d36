//! Durable conversation records: message log and token-usage ledger.

pub mod history;
pub mod usage;

pub use history::{MessageLog, StoredMessage};
pub use usage::UsageLog;
