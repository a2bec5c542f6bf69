use async_trait::async_trait;

use crate::errors::StorageError;

/// Transaction boundary exposed by the persistence layer.
///
/// Both ends consume the transaction so it cannot be used after it finished.
#[async_trait]
pub trait Transaction: Send + Sized {
    async fn commit(self) -> Result<(), StorageError>;

    async fn rollback(self) -> Result<(), StorageError>;
}
