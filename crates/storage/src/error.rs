use crate::api::{Error as BackendError, Table};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(BackendError),
    #[error("failed to decode {what} from table {table:?}: {reason}")]
    Decode {
        table: Table,
        what: &'static str,
        reason: String,
    },
    #[error("{what} exceeds its encoding bound")]
    TooLarge { what: &'static str },
}

impl From<BackendError> for StoreError {
    fn from(err: BackendError) -> Self {
        Self::Backend(err)
    }
}
