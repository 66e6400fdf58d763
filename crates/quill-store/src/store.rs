use crate::blame::BlameTree;
use crate::types::{DataHandle, Position};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("cannot blame '{document}' at {position}: {reason}")]
    BlameFailed {
        document: String,
        position: String,
        reason: String,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("io failure: {0}")]
    Io(String),

    #[error("backend failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// An ordered, keyed set of documents.
#[async_trait::async_trait]
pub trait DataSource: Send + Sync {
    async fn enumerate(&self) -> StoreResult<Vec<String>>;

    async fn read(&self, key: &str) -> StoreResult<Option<DataHandle>>;

    async fn read_strict(&self, key: &str) -> StoreResult<DataHandle> {
        self.read(key)
            .await?
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    /// All documents in enumeration order.
    async fn handles(&self) -> StoreResult<Vec<DataHandle>> {
        let keys = self.enumerate().await?;
        let mut handles = Vec::with_capacity(keys.len());
        for key in keys {
            handles.push(self.read_strict(&key).await?);
        }
        Ok(handles)
    }
}

pub type SharedDataSource = Arc<dyn DataSource>;

/// Resolves a position in a generated document back to the original
/// locations that produced it.
pub trait Blame: Send + Sync {
    fn blame(&self, document: &str, position: &Position) -> StoreResult<BlameTree>;
}
