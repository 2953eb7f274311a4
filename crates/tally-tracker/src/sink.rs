//! Where flushed operations are applied.

use std::sync::Arc;

use async_trait::async_trait;

use tally_core::{FrontmatterError, UpdateOperation};
use tally_vault::FrontmatterStore;

/// Applies one queued operation durably.
#[async_trait]
pub trait OperationSink: Send + Sync {
    async fn apply(&self, op: &UpdateOperation) -> Result<(), FrontmatterError>;
}

#[async_trait]
impl OperationSink for FrontmatterStore {
    async fn apply(&self, op: &UpdateOperation) -> Result<(), FrontmatterError> {
        self.increment_field(&op.document, &op.field_key, op.delta)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl<T: OperationSink + ?Sized> OperationSink for Arc<T> {
    async fn apply(&self, op: &UpdateOperation) -> Result<(), FrontmatterError> {
        (**self).apply(op).await
    }
}
