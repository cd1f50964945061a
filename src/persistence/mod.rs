//! Crash-surviving state: the key-value ledger and the order journal.

pub mod store;

pub use store::{Ledger, OrderRecord, SqliteStore};
