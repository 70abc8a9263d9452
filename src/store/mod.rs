pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::developer::{Developer, DeveloperQuery, DeveloperUpdate, NewDeveloper};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already exists")]
    DuplicateEmail,

    #[error("developer id already exists")]
    DuplicateId,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store error: {0}")]
    Other(String),
}

/// Outcome of a conditional expiration update.
#[derive(Debug, Clone, PartialEq)]
pub enum SwapOutcome {
    /// The stored expiration still matched and the update was written.
    Applied(Developer),
    /// Someone else moved the expiration first; nothing was written.
    Conflict,
}

/// Persistence for developer records.
/// Implementations: PgStore (Postgres via sqlx), MemoryStore (tests, local dev).
#[async_trait]
pub trait DeveloperStore: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Developer>, StoreError>;

    async fn get_by_query(&self, query: &DeveloperQuery) -> Result<Option<Developer>, StoreError>;

    /// Apply a partial update to the developer matching `query`.
    /// Returns `false` when nothing matched.
    async fn update(&self, query: &DeveloperQuery, update: &DeveloperUpdate) -> Result<bool, StoreError>;

    async fn insert(&self, developer: NewDeveloper) -> Result<Developer, StoreError>;

    /// Compare-and-swap on `expiration`: writes `update` only if the stored
    /// expiration still equals `expected`.
    async fn advance_expiration(
        &self,
        id: Uuid,
        expected: Option<DateTime<Utc>>,
        update: &DeveloperUpdate,
    ) -> Result<SwapOutcome, StoreError>;

    async fn list(&self) -> Result<Vec<Developer>, StoreError>;
}
