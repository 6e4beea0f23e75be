//! Byte-level storage API the chain store is written against.
//!
//! A backend hands out read views and write batches over a fixed set of [`Table`]s.
//! A batch is the only durability boundary: the block tree and the branch processor
//! group every related write (a chain level with its header, a deletion step with the
//! next delete pointer, a branch's states with its receipts) into one batch.

mod tables;
mod traits;

pub use tables::{ALL_TABLES, Table};
pub use traits::{Error, PrefixResult, StorageBackend, StorageReadView, StorageWriteBatch};
