use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A developer account as persisted by the credential store.
///
/// `expiration` is optional only at the storage boundary: every row written by
/// this crate carries one, and a missing value is reported as a data-integrity
/// fault by the license evaluator rather than defaulted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Developer {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub token: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(skip_serializing)]
    pub salt: String,
    pub expiration: Option<DateTime<Utc>>,
    pub payment_method_token: Option<String>,
    pub is_paid: bool,
    pub is_admin: bool,
    pub integration_engineer: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Developer {
    /// The stored payment-method reference, with empty strings treated as absent.
    pub fn payment_method(&self) -> Option<&str> {
        self.payment_method_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
    }

    /// Snapshot safe to hand back to the developer who owns the record.
    pub fn public(&self) -> PublicDeveloper {
        PublicDeveloper {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            token: Some(self.token.clone()),
            expiration: self.expiration,
            is_paid: self.is_paid,
            is_admin: self.is_admin,
            has_payment_method: self.payment_method().is_some(),
            integration_engineer: self.integration_engineer.clone(),
            created_at: self.created_at,
        }
    }

    /// Snapshot for session responses: same as [`Developer::public`] without the token.
    pub fn session_view(&self) -> PublicDeveloper {
        PublicDeveloper {
            token: None,
            ..self.public()
        }
    }

    /// What another developer is allowed to see.
    pub fn minimal(&self) -> MinimalDeveloper {
        MinimalDeveloper {
            name: self.name.clone(),
            email: self.email.clone(),
            integration_engineer: self.integration_engineer.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicDeveloper {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub expiration: Option<DateTime<Utc>>,
    pub is_paid: bool,
    pub is_admin: bool,
    pub has_payment_method: bool,
    pub integration_engineer: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinimalDeveloper {
    pub name: String,
    pub email: String,
    pub integration_engineer: Option<String>,
}

/// A developer about to be inserted. The store assigns nothing; callers
/// decide id, token and the initial license window.
#[derive(Debug, Clone)]
pub struct NewDeveloper {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub token: String,
    pub password_hash: String,
    pub salt: String,
    pub expiration: DateTime<Utc>,
    pub payment_method_token: Option<String>,
    pub is_paid: bool,
    pub is_admin: bool,
    pub integration_engineer: Option<String>,
}

impl NewDeveloper {
    pub fn into_developer(self, created_at: DateTime<Utc>) -> Developer {
        Developer {
            id: self.id,
            name: self.name,
            email: self.email,
            token: self.token,
            password_hash: self.password_hash,
            salt: self.salt,
            expiration: Some(self.expiration),
            payment_method_token: self.payment_method_token,
            is_paid: self.is_paid,
            is_admin: self.is_admin,
            integration_engineer: self.integration_engineer,
            created_at,
        }
    }
}

/// Typed partial update. Identity is immutable, so there is no `id` field.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeveloperUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    #[serde(skip_serializing)]
    pub salt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub payment_method_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_paid: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_admin: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integration_engineer: Option<String>,
}

impl DeveloperUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the set fields to an in-memory record.
    pub fn apply_to(&self, dev: &mut Developer) {
        if let Some(ref v) = self.name {
            dev.name = v.clone();
        }
        if let Some(ref v) = self.email {
            dev.email = v.clone();
        }
        if let Some(ref v) = self.token {
            dev.token = v.clone();
        }
        if let Some(ref v) = self.password_hash {
            dev.password_hash = v.clone();
        }
        if let Some(ref v) = self.salt {
            dev.salt = v.clone();
        }
        if let Some(v) = self.expiration {
            dev.expiration = Some(v);
        }
        if let Some(ref v) = self.payment_method_token {
            dev.payment_method_token = Some(v.clone());
        }
        if let Some(v) = self.is_paid {
            dev.is_paid = v;
        }
        if let Some(v) = self.is_admin {
            dev.is_admin = v;
        }
        if let Some(ref v) = self.integration_engineer {
            dev.integration_engineer = Some(v.clone());
        }
    }
}

/// Point-lookup keys supported by the credential store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeveloperQuery {
    ById(Uuid),
    ByEmail(String),
    ByToken(String),
}

impl std::fmt::Display for DeveloperQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeveloperQuery::ById(id) => write!(f, "id={}", id),
            DeveloperQuery::ByEmail(email) => write!(f, "email={}", email),
            // tokens are credentials; never print them
            DeveloperQuery::ByToken(_) => write!(f, "token=****"),
        }
    }
}
