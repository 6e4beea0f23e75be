//! [`crate::api::StorageBackend`] implementations.
//!
//! - [`InMemoryBackend`]: ordered maps behind a lock. Clones share data, which lets
//!   tests reopen a tree over the same store.
//! - [`RocksDBBackend`] (`rocksdb` feature): one column family per table, synced writes.

mod in_memory;
#[cfg(feature = "rocksdb")]
mod rocksdb;
#[cfg(test)]
mod tests;

pub use in_memory::InMemoryBackend;
#[cfg(feature = "rocksdb")]
pub use rocksdb::RocksDBBackend;
