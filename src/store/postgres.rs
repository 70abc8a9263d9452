use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{DeveloperStore, StoreError, SwapOutcome};
use crate::models::developer::{Developer, DeveloperQuery, DeveloperUpdate, NewDeveloper};

const DEVELOPER_COLUMNS: &str = "id, name, email, token, password_hash, salt, expiration, \
     payment_method_token, is_paid, is_admin, integration_engineer, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// Appends `WHERE <column> = $n` for a point lookup.
fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, query: &DeveloperQuery) {
    match query {
        DeveloperQuery::ById(id) => {
            qb.push(" WHERE id = ").push_bind(*id);
        }
        DeveloperQuery::ByEmail(email) => {
            qb.push(" WHERE email = ").push_bind(email.clone());
        }
        DeveloperQuery::ByToken(token) => {
            // an empty token must never match a trial account that has none yet
            qb.push(" WHERE token <> '' AND token = ").push_bind(token.clone());
        }
    }
}

/// Appends `SET a = $1, b = $2, ...` for every field present in `update`.
fn push_assignments(qb: &mut QueryBuilder<'_, Postgres>, update: &DeveloperUpdate) {
    let mut set = qb.separated(", ");
    if let Some(ref v) = update.name {
        set.push("name = ").push_bind_unseparated(v.clone());
    }
    if let Some(ref v) = update.email {
        set.push("email = ").push_bind_unseparated(v.clone());
    }
    if let Some(ref v) = update.token {
        set.push("token = ").push_bind_unseparated(v.clone());
    }
    if let Some(ref v) = update.password_hash {
        set.push("password_hash = ").push_bind_unseparated(v.clone());
    }
    if let Some(ref v) = update.salt {
        set.push("salt = ").push_bind_unseparated(v.clone());
    }
    if let Some(v) = update.expiration {
        set.push("expiration = ").push_bind_unseparated(v);
    }
    if let Some(ref v) = update.payment_method_token {
        set.push("payment_method_token = ").push_bind_unseparated(v.clone());
    }
    if let Some(v) = update.is_paid {
        set.push("is_paid = ").push_bind_unseparated(v);
    }
    if let Some(v) = update.is_admin {
        set.push("is_admin = ").push_bind_unseparated(v);
    }
    if let Some(ref v) = update.integration_engineer {
        set.push("integration_engineer = ").push_bind_unseparated(v.clone());
    }
    set.push("updated_at = NOW()");
}

fn map_write_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            match db.constraint() {
                Some("developers_email_key") => StoreError::DuplicateEmail,
                Some("developers_pkey") => StoreError::DuplicateId,
                _ => StoreError::Other(db.message().to_string()),
            }
        }
        other => StoreError::Database(other),
    }
}

#[async_trait]
impl DeveloperStore for PgStore {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Developer>, StoreError> {
        self.get_by_query(&DeveloperQuery::ById(id)).await
    }

    async fn get_by_query(&self, query: &DeveloperQuery) -> Result<Option<Developer>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM developers", DEVELOPER_COLUMNS));
        push_filter(&mut qb, query);
        let row = qb
            .build_query_as::<Developer>()
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn update(&self, query: &DeveloperQuery, update: &DeveloperUpdate) -> Result<bool, StoreError> {
        if update.is_empty() {
            return Ok(self.get_by_query(query).await?.is_some());
        }

        let mut qb = QueryBuilder::<Postgres>::new("UPDATE developers SET ");
        push_assignments(&mut qb, update);
        push_filter(&mut qb, query);

        let result = qb
            .build()
            .execute(&self.pool)
            .await
            .map_err(map_write_error)?;

        tracing::debug!(%query, rows = result.rows_affected(), "developer updated");
        Ok(result.rows_affected() > 0)
    }

    async fn insert(&self, dev: NewDeveloper) -> Result<Developer, StoreError> {
        let row = sqlx::query_as::<_, Developer>(&format!(
            r#"INSERT INTO developers (id, name, email, token, password_hash, salt, expiration,
                   payment_method_token, is_paid, is_admin, integration_engineer)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
               RETURNING {}"#,
            DEVELOPER_COLUMNS
        ))
        .bind(dev.id)
        .bind(&dev.name)
        .bind(&dev.email)
        .bind(&dev.token)
        .bind(&dev.password_hash)
        .bind(&dev.salt)
        .bind(dev.expiration)
        .bind(&dev.payment_method_token)
        .bind(dev.is_paid)
        .bind(dev.is_admin)
        .bind(&dev.integration_engineer)
        .fetch_one(&self.pool)
        .await
        .map_err(map_write_error)?;

        Ok(row)
    }

    async fn advance_expiration(
        &self,
        id: Uuid,
        expected: Option<DateTime<Utc>>,
        update: &DeveloperUpdate,
    ) -> Result<SwapOutcome, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE developers SET ");
        push_assignments(&mut qb, update);
        qb.push(" WHERE id = ").push_bind(id);
        qb.push(" AND expiration IS NOT DISTINCT FROM ").push_bind(expected);
        qb.push(format!(" RETURNING {}", DEVELOPER_COLUMNS));

        let row = qb
            .build_query_as::<Developer>()
            .fetch_optional(&self.pool)
            .await
            .map_err(map_write_error)?;

        Ok(match row {
            Some(dev) => SwapOutcome::Applied(dev),
            None => SwapOutcome::Conflict,
        })
    }

    async fn list(&self) -> Result<Vec<Developer>, StoreError> {
        let rows = sqlx::query_as::<_, Developer>(&format!(
            "SELECT {} FROM developers ORDER BY created_at DESC",
            DEVELOPER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
