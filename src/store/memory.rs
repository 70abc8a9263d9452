//! In-process developer store.
//!
//! Backs the test-suite and `DATABASE_URL=memory://` local runs. Everything
//! lives behind one `RwLock`, which keeps the email uniqueness check and the
//! expiration compare-and-swap atomic.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{DeveloperStore, StoreError, SwapOutcome};
use crate::models::developer::{Developer, DeveloperQuery, DeveloperUpdate, NewDeveloper};

#[derive(Clone, Default)]
pub struct MemoryStore {
    developers: Arc<RwLock<HashMap<Uuid, Developer>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches(dev: &Developer, query: &DeveloperQuery) -> bool {
        match query {
            DeveloperQuery::ById(id) => dev.id == *id,
            DeveloperQuery::ByEmail(email) => dev.email == *email,
            DeveloperQuery::ByToken(token) => !token.is_empty() && dev.token == *token,
        }
    }
}

#[async_trait]
impl DeveloperStore for MemoryStore {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Developer>, StoreError> {
        Ok(self.developers.read().await.get(&id).cloned())
    }

    async fn get_by_query(&self, query: &DeveloperQuery) -> Result<Option<Developer>, StoreError> {
        let map = self.developers.read().await;
        Ok(map.values().find(|d| Self::matches(d, query)).cloned())
    }

    async fn update(&self, query: &DeveloperQuery, update: &DeveloperUpdate) -> Result<bool, StoreError> {
        let mut map = self.developers.write().await;
        if let Some(ref email) = update.email {
            let clash = map
                .values()
                .any(|d| d.email == *email && !Self::matches(d, query));
            if clash {
                return Err(StoreError::DuplicateEmail);
            }
        }
        match map.values_mut().find(|d| Self::matches(d, query)) {
            Some(dev) => {
                update.apply_to(dev);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert(&self, developer: NewDeveloper) -> Result<Developer, StoreError> {
        let mut map = self.developers.write().await;
        if map.values().any(|d| d.email == developer.email) {
            return Err(StoreError::DuplicateEmail);
        }
        if map.contains_key(&developer.id) {
            return Err(StoreError::DuplicateId);
        }
        let dev = developer.into_developer(Utc::now());
        map.insert(dev.id, dev.clone());
        Ok(dev)
    }

    async fn advance_expiration(
        &self,
        id: Uuid,
        expected: Option<DateTime<Utc>>,
        update: &DeveloperUpdate,
    ) -> Result<SwapOutcome, StoreError> {
        let mut map = self.developers.write().await;
        match map.get_mut(&id) {
            Some(dev) if dev.expiration == expected => {
                update.apply_to(dev);
                Ok(SwapOutcome::Applied(dev.clone()))
            }
            _ => Ok(SwapOutcome::Conflict),
        }
    }

    async fn list(&self) -> Result<Vec<Developer>, StoreError> {
        let mut all: Vec<Developer> = self.developers.read().await.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }
}
