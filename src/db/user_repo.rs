use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::SqlitePool;

use crate::models::{Identity, MeasureType, ProfileDefaults, ProfileUpdate, User};
use crate::store::{IdentityStore, StoreError};

/// `IdentityStore` backed by the `users` table.
#[derive(Clone)]
pub struct SqliteIdentityStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    email: String,
    name: String,
    pref_measure: String,
    profile_pic: Option<String>,
    created_at: i64,
}

impl SqliteIdentityStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// All users ordered by email.
    pub async fn list(&self) -> Result<Vec<User>, StoreError> {
        let rows: Vec<UserRow> = sqlx::query_as("SELECT * FROM users ORDER BY email")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(hydrate_user).collect()
    }
}

#[async_trait]
impl IdentityStore for SqliteIdentityStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.map(hydrate_user).transpose()
    }

    async fn create(&self, email: &str, defaults: &ProfileDefaults) -> Result<User, StoreError> {
        let user = User::new(email, defaults);

        sqlx::query(
            r#"
            INSERT INTO users (id, email, name, pref_measure, profile_pic, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user.id.to_string())
        .bind(&user.email)
        .bind(&user.name)
        .bind(user.pref_measure.to_string())
        .bind(&user.profile_pic)
        .bind(user.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        tracing::info!(user = %user.id, email = %user.email, "created user");

        self.get(user.id)
            .await?
            .ok_or_else(|| StoreError::NotFound(user.id.to_string()))
    }

    async fn get(&self, id: Identity) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(hydrate_user).transpose()
    }

    async fn update(&self, id: Identity, fields: &ProfileUpdate) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET email = COALESCE(?, email),
                name = COALESCE(?, name),
                pref_measure = COALESCE(?, pref_measure)
            WHERE id = ?
            "#,
        )
        .bind(&fields.email)
        .bind(&fields.name)
        .bind(fields.pref_measure.map(|m| m.to_string()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

fn hydrate_user(row: UserRow) -> Result<User, StoreError> {
    let id = row
        .id
        .parse::<Identity>()
        .map_err(|e| StoreError::InvalidRow(format!("user id '{}': {}", row.id, e)))?;
    let pref_measure = row
        .pref_measure
        .parse::<MeasureType>()
        .map_err(StoreError::InvalidRow)?;

    Ok(User {
        id,
        email: row.email,
        name: row.name,
        pref_measure,
        profile_pic: row.profile_pic,
        created_at: millis_to_datetime(row.created_at)?,
    })
}

pub(super) fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| StoreError::InvalidRow(format!("timestamp out of range: {}", millis)))
}
