mod api;
pub mod backend;
mod error;
mod store;

pub use api::{
    ALL_TABLES, Error as BackendError, StorageBackend, StorageReadView, StorageWriteBatch, Table,
};
pub use error::StoreError;
pub use store::{ChainStore, ChainWriteBatch, DELETE_POINTER_KEY, HEAD_KEY};
