//! Developer accounts: registration, login, profile and password changes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::auth;
use crate::config::BillingPolicy;
use crate::license::period_end;
use crate::models::developer::{
    Developer, DeveloperQuery, DeveloperUpdate, MinimalDeveloper, NewDeveloper, PublicDeveloper,
};
use crate::notification::{EventNotifier, LicenseEvent};
use crate::store::{DeveloperStore, StoreError};

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidCredentials(String),

    #[error("email already exists")]
    DuplicateEmail,

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for AccountError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateEmail => AccountError::DuplicateEmail,
            other => AccountError::Store(other),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Self-service profile changes. Empty strings are ignored like absent fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRequest {
    pub password: Option<String>,
    #[serde(alias = "oldpassword")]
    pub old_password: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    #[serde(alias = "integrationEngineer")]
    pub integration_engineer: Option<String>,
}

/// Changes only an operator may make.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminUpdateRequest {
    #[serde(alias = "isAdmin")]
    pub is_admin: Option<bool>,
    /// RFC 3339.
    #[serde(alias = "nextPaymentTime")]
    pub expiration: Option<String>,
}

/// What a caller may see of another developer's record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DeveloperView {
    Owner(PublicDeveloper),
    Other(MinimalDeveloper),
}

pub struct AccountService {
    store: Arc<dyn DeveloperStore>,
    notifier: Arc<dyn EventNotifier>,
    trial_period: chrono::Duration,
}

impl AccountService {
    pub fn new(store: Arc<dyn DeveloperStore>, notifier: Arc<dyn EventNotifier>, policy: &BillingPolicy) -> Self {
        Self {
            store,
            notifier,
            trial_period: policy.trial_period,
        }
    }

    /// Register a developer with a password and a trial window.
    pub async fn create_developer(&self, creds: Credentials) -> Result<Developer, AccountError> {
        let (email, password) = require_credentials(&creds)?;

        if self
            .store
            .get_by_query(&DeveloperQuery::ByEmail(email.clone()))
            .await?
            .is_some()
        {
            return Err(AccountError::DuplicateEmail);
        }

        let salt = auth::generate_salt();
        let developer = self
            .store
            .insert(NewDeveloper {
                id: Uuid::new_v4(),
                name: creds.name.trim().to_string(),
                email,
                token: auth::generate_token(),
                password_hash: auth::hash_password(&password, &salt),
                salt,
                expiration: period_end(Utc::now(), self.trial_period),
                payment_method_token: None,
                is_paid: false,
                is_admin: false,
                integration_engineer: None,
            })
            .await?;

        tracing::info!(developer_id = %developer.id, "developer created");
        self.notifier.emit(LicenseEvent::developer_created(&developer));
        Ok(developer)
    }

    /// Verify credentials and rotate the bearer token. Returns the new token.
    pub async fn login(&self, creds: Credentials) -> Result<String, AccountError> {
        let (email, password) = require_credentials(&creds)?;
        let query = DeveloperQuery::ByEmail(email.clone());

        let developer = self
            .store
            .get_by_query(&query)
            .await?
            .ok_or_else(|| AccountError::NotFound(format!("No such developer with email {}.", email)))?;

        if !auth::verify_password(&password, &developer.salt, &developer.password_hash) {
            tracing::info!(developer_id = %developer.id, "login rejected");
            return Err(AccountError::InvalidCredentials("Incorrect Password".to_string()));
        }

        let token = auth::generate_token();
        let update = DeveloperUpdate {
            token: Some(token.clone()),
            ..Default::default()
        };
        if !self.store.update(&DeveloperQuery::ById(developer.id), &update).await? {
            return Err(AccountError::NotFound(format!("No such developer with email {}.", email)));
        }

        tracing::debug!(developer_id = %developer.id, "token rotated");
        Ok(token)
    }

    /// The developer holding `token`.
    pub async fn current(&self, token: &str) -> Result<Developer, AccountError> {
        if token.is_empty() {
            return Err(AccountError::InvalidInput("Valid token required.".to_string()));
        }
        self.store
            .get_by_query(&DeveloperQuery::ByToken(token.to_string()))
            .await?
            .ok_or_else(|| AccountError::NotFound("Invalid Token.".to_string()))
    }

    /// Full snapshot when `token` belongs to the developer, minimal otherwise.
    pub async fn public_by_id(&self, id: &str, token: &str) -> Result<DeveloperView, AccountError> {
        if token.is_empty() {
            return Err(AccountError::InvalidInput("Valid token required.".to_string()));
        }
        let developer = self.by_id(id).await?;

        if auth::constant_time_eq(&developer.token, token) {
            Ok(DeveloperView::Owner(developer.public()))
        } else {
            Ok(DeveloperView::Other(developer.minimal()))
        }
    }

    pub async fn update(&self, token: &str, req: UpdateRequest) -> Result<Developer, AccountError> {
        let developer = self.current(token).await?;
        let mut update = DeveloperUpdate::default();

        if let Some(password) = non_empty(req.password) {
            // Accounts created by a silent trial have no password to confirm.
            if !developer.password_hash.is_empty() {
                let old = non_empty(req.old_password).unwrap_or_default();
                if !auth::verify_password(&old, &developer.salt, &developer.password_hash) {
                    return Err(AccountError::InvalidCredentials(
                        "Old password is incorrect.".to_string(),
                    ));
                }
            }
            let (salt, hash) = rehash(&developer, &password);
            update.salt = salt;
            update.password_hash = Some(hash);
        }

        update.name = non_empty(req.name);
        update.email = non_empty(req.email);
        update.integration_engineer = non_empty(req.integration_engineer);

        self.apply(&developer, update, "developer updated").await
    }

    /// Operator edit of the license window and admin flag, keyed by token.
    pub async fn admin_update(&self, token: &str, req: AdminUpdateRequest) -> Result<Developer, AccountError> {
        let developer = self.current(token).await?;
        let mut update = DeveloperUpdate {
            is_admin: req.is_admin,
            ..Default::default()
        };

        if let Some(raw) = non_empty(req.expiration) {
            let parsed = DateTime::parse_from_rfc3339(&raw)
                .map_err(|e| AccountError::InvalidInput(format!("invalid expiration {:?}: {}", raw, e)))?;
            update.expiration = Some(parsed.with_timezone(&Utc));
        }

        self.apply(&developer, update, "developer updated by admin").await
    }

    async fn apply(
        &self,
        developer: &Developer,
        update: DeveloperUpdate,
        message: &'static str,
    ) -> Result<Developer, AccountError> {
        let query = DeveloperQuery::ById(developer.id);
        if !self.store.update(&query, &update).await? {
            return Err(AccountError::NotFound("Invalid Token.".to_string()));
        }

        tracing::info!(
            developer_id = %developer.id,
            changes = %serde_json::to_value(&update).unwrap_or_default(),
            "{}",
            message
        );
        self.by_id(&developer.id.to_string()).await
    }

    /// Password reset: `token` must belong to developer `id`.
    pub async fn edit_password(&self, token: &str, id: &str, new_password: &str) -> Result<Developer, AccountError> {
        if new_password.is_empty() {
            return Err(AccountError::InvalidInput("New password required.".to_string()));
        }
        let developer = self.by_id(id).await?;
        if token.is_empty() || !auth::constant_time_eq(&developer.token, token) {
            return Err(AccountError::InvalidCredentials("Invalid Token".to_string()));
        }

        let (salt, hash) = rehash(&developer, new_password);
        let update = DeveloperUpdate {
            password_hash: Some(hash),
            salt,
            ..Default::default()
        };
        self.store.update(&DeveloperQuery::ById(developer.id), &update).await?;

        tracing::info!(developer_id = %developer.id, "password reset");
        self.by_id(id).await
    }

    pub async fn list(&self) -> Result<Vec<Developer>, AccountError> {
        Ok(self.store.list().await?)
    }

    pub async fn by_token(&self, token: &str) -> Result<Developer, AccountError> {
        self.current(token).await
    }

    async fn by_id(&self, id: &str) -> Result<Developer, AccountError> {
        let not_found = || AccountError::NotFound(format!("developer {} not found", id));
        let uuid = Uuid::parse_str(id).map_err(|_| not_found())?;
        self.store.get_by_id(uuid).await?.ok_or_else(not_found)
    }
}

fn require_credentials(creds: &Credentials) -> Result<(String, String), AccountError> {
    let email = creds.email.trim();
    if email.is_empty() || creds.password.is_empty() {
        return Err(AccountError::InvalidInput("Email and Password Required.".to_string()));
    }
    Ok((email.to_string(), creds.password.clone()))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Hash `password` with the developer's salt, minting one if it has none.
/// Returns the salt to persist (if new) and the hash.
fn rehash(developer: &Developer, password: &str) -> (Option<String>, String) {
    if developer.salt.is_empty() {
        let salt = auth::generate_salt();
        let hash = auth::hash_password(password, &salt);
        (Some(salt), hash)
    } else {
        (None, auth::hash_password(password, &developer.salt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::{EventKind, MemoryNotifier};
    use crate::store::memory::MemoryStore;

    fn service() -> (AccountService, MemoryNotifier) {
        let events = MemoryNotifier::new();
        let svc = AccountService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(events.clone()),
            &BillingPolicy::default(),
        );
        (svc, events)
    }

    fn creds(email: &str, password: &str) -> Credentials {
        Credentials {
            name: "Larz".into(),
            email: email.into(),
            password: password.into(),
        }
    }

    #[tokio::test]
    async fn test_create_requires_email_and_password() {
        let (svc, _) = service();
        let err = svc.create_developer(creds("", "pw")).await.unwrap_err();
        assert!(matches!(err, AccountError::InvalidInput(_)));
        let err = svc.create_developer(creds("a@example.com", "")).await.unwrap_err();
        assert!(matches!(err, AccountError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_create_grants_trial_and_rejects_duplicates() {
        let (svc, events) = service();
        let dev = svc.create_developer(creds("larz@example.com", "pw")).await.unwrap();

        assert_eq!(dev.token.len(), 64);
        assert!(dev.expiration.unwrap() > Utc::now() + chrono::Duration::days(29));
        assert!(auth::verify_password("pw", &dev.salt, &dev.password_hash));
        assert_eq!(events.kinds(), vec![EventKind::DeveloperCreated]);

        let err = svc.create_developer(creds("larz@example.com", "pw2")).await.unwrap_err();
        assert!(matches!(err, AccountError::DuplicateEmail));
    }

    #[tokio::test]
    async fn test_login_rotates_token() {
        let (svc, _) = service();
        let dev = svc.create_developer(creds("byrd@example.com", "secret")).await.unwrap();

        let token = svc.login(creds("byrd@example.com", "secret")).await.unwrap();
        assert_ne!(token, dev.token);
        assert_eq!(svc.current(&token).await.unwrap().id, dev.id);
        assert!(matches!(
            svc.current(&dev.token).await,
            Err(AccountError::NotFound(_))
        ));

        let wrong = svc.login(creds("byrd@example.com", "nope")).await;
        assert!(matches!(wrong, Err(AccountError::InvalidCredentials(_))));
        let unknown = svc.login(creds("ghost@example.com", "secret")).await;
        assert!(matches!(unknown, Err(AccountError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_public_by_id_hides_details_from_others() {
        let (svc, _) = service();
        let owner = svc.create_developer(creds("owner@example.com", "pw")).await.unwrap();
        let other = svc.create_developer(creds("other@example.com", "pw")).await.unwrap();
        let id = owner.id.to_string();

        match svc.public_by_id(&id, &owner.token).await.unwrap() {
            DeveloperView::Owner(p) => assert_eq!(p.token.as_deref(), Some(owner.token.as_str())),
            v => panic!("expected owner view, got {:?}", v),
        }
        match svc.public_by_id(&id, &other.token).await.unwrap() {
            DeveloperView::Other(m) => assert_eq!(m.email, "owner@example.com"),
            v => panic!("expected minimal view, got {:?}", v),
        }
        assert!(matches!(
            svc.public_by_id(&id, "").await,
            Err(AccountError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_update_checks_old_password() {
        let (svc, _) = service();
        let dev = svc.create_developer(creds("steve@example.com", "old")).await.unwrap();

        let bad = svc
            .update(
                &dev.token,
                UpdateRequest {
                    password: Some("new".into()),
                    old_password: Some("wrong".into()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(bad, Err(AccountError::InvalidCredentials(_))));

        let updated = svc
            .update(
                &dev.token,
                UpdateRequest {
                    password: Some("new".into()),
                    old_password: Some("old".into()),
                    name: Some("Steve".into()),
                    email: Some("".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.name, "Steve");
        assert_eq!(updated.email, "steve@example.com");
        assert_eq!(updated.expiration, dev.expiration);
        assert!(auth::verify_password("new", &updated.salt, &updated.password_hash));
    }

    #[tokio::test]
    async fn test_self_update_ignores_license_fields() {
        let (svc, _) = service();
        let dev = svc.create_developer(creds("sneaky@example.com", "pw")).await.unwrap();
        let req: UpdateRequest = serde_json::from_value(serde_json::json!({
            "name": "Sneaky",
            "expiration": "2099-01-01T00:00:00Z",
            "is_admin": true,
        }))
        .unwrap();

        let updated = svc.update(&dev.token, req).await.unwrap();
        assert_eq!(updated.name, "Sneaky");
        assert_eq!(updated.expiration, dev.expiration);
        assert!(!updated.is_admin);
    }

    #[tokio::test]
    async fn test_admin_update_sets_expiration_and_flag() {
        let (svc, _) = service();
        let dev = svc.create_developer(creds("ops@example.com", "pw")).await.unwrap();

        let updated = svc
            .admin_update(
                &dev.token,
                AdminUpdateRequest {
                    is_admin: Some(true),
                    expiration: Some("2030-01-01T00:00:00Z".into()),
                },
            )
            .await
            .unwrap();
        assert!(updated.is_admin);
        assert_eq!(updated.expiration.unwrap().to_rfc3339(), "2030-01-01T00:00:00+00:00");

        let result = svc
            .admin_update(
                &dev.token,
                AdminUpdateRequest {
                    expiration: Some("next tuesday".into()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(AccountError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_edit_password_requires_matching_token() {
        let (svc, _) = service();
        let dev = svc.create_developer(creds("reset@example.com", "old")).await.unwrap();
        let id = dev.id.to_string();

        let wrong = svc.edit_password("someone-else", &id, "fresh").await;
        assert!(matches!(wrong, Err(AccountError::InvalidCredentials(_))));

        let updated = svc.edit_password(&dev.token, &id, "fresh").await.unwrap();
        assert!(auth::verify_password("fresh", &updated.salt, &updated.password_hash));
    }
}
