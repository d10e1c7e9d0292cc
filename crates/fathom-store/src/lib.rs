//! Document store contract and bindings.
//!
//! Documents are raw JSON values addressed by container, id and partition
//! key; the only write is an idempotent upsert. Throttling surfaces as a
//! typed error carrying the server's retry hint so callers can implement
//! bounded backoff.

use async_trait::async_trait;
use serde_json::Value;

pub mod cosmos;
pub mod error;
pub mod memory;

pub use cosmos::CosmosStore;
pub use error::StoreError;
pub use memory::MemoryStore;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Point-read one document. `Ok(None)` when it does not exist.
    async fn read(
        &self,
        container: &str,
        id: &str,
        partition_key: &str,
    ) -> Result<Option<Value>, StoreError>;

    /// Create-or-replace by the document's `id` within `partition_key`.
    async fn upsert(
        &self,
        container: &str,
        partition_key: &str,
        document: &Value,
    ) -> Result<(), StoreError>;
}
