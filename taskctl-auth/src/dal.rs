use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{migrate::MigrateDatabase, sqlite::SqliteConnectOptions, Row, SqlitePool};
use taskctl_backends::repositories::{
    ApiKeyBindingRepository, PendingApiKeyRepository, UserRepository,
};
use taskctl_common::{
    models::user::{PendingApiKey, User},
    Result,
};

static MIGRATIONS: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// The sqlx-backed implementation of every repository this service owns.
/// Mirrors `shuttle_auth::dal::Sqlite`: one pool, one migrator, cloned
/// rather than recreated per caller.
#[derive(Clone)]
pub struct Sqlite {
    pool: SqlitePool,
}

impl Sqlite {
    pub async fn new(path: &str) -> Self {
        if !Path::new(path).exists() {
            sqlx::Sqlite::create_database(path).await.unwrap();
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
        let pool = SqlitePool::connect_with(options).await.unwrap();
        Self::from_pool(pool).await
    }

    pub async fn new_in_memory() -> Self {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Self {
        MIGRATIONS.run(&pool).await.unwrap();
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for Sqlite {
    async fn insert(&self, user: User) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (email, created_at, revoked, last_used, expires_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&user.email)
        .bind(user.created_at)
        .bind(user.revoked)
        .bind(user.last_used)
        .bind(user.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT email, created_at, revoked, last_used, expires_at FROM users WHERE email = ?1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| User {
            email: row.get("email"),
            created_at: row.get("created_at"),
            revoked: row.get("revoked"),
            last_used: row.get("last_used"),
            expires_at: row.get("expires_at"),
        }))
    }

    async fn list(&self) -> Result<Vec<User>> {
        let rows = sqlx::query(
            "SELECT email, created_at, revoked, last_used, expires_at FROM users ORDER BY email ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| User {
                email: row.get("email"),
                created_at: row.get("created_at"),
                revoked: row.get("revoked"),
                last_used: row.get("last_used"),
                expires_at: row.get("expires_at"),
            })
            .collect())
    }

    async fn set_revoked(&self, email: &str, revoked: bool) -> Result<bool> {
        let rows_affected = sqlx::query("UPDATE users SET revoked = ?1 WHERE email = ?2")
            .bind(revoked)
            .bind(email)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(rows_affected > 0)
    }

    async fn update_last_used(&self, email: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE users SET last_used = ?1 WHERE email = ?2")
            .bind(at)
            .bind(email)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_expiration(&self, email: &str) -> Result<bool> {
        let rows_affected = sqlx::query("UPDATE users SET expires_at = NULL WHERE email = ?1")
            .bind(email)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(rows_affected > 0)
    }
}

#[async_trait]
impl PendingApiKeyRepository for Sqlite {
    async fn insert(&self, key: PendingApiKey) -> Result<()> {
        sqlx::query(
            "INSERT INTO pending_api_keys (secret_token, api_key, user_email, created_by, created_at, expires_at, viewed, ip_address)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&key.secret_token)
        .bind(&key.api_key)
        .bind(&key.user_email)
        .bind(&key.created_by)
        .bind(key.created_at)
        .bind(key.expires_at)
        .bind(key.viewed)
        .bind(&key.ip_address)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_token(&self, secret_token: &str) -> Result<Option<PendingApiKey>> {
        let row = sqlx::query(
            "SELECT secret_token, api_key, user_email, created_by, created_at, expires_at, viewed, ip_address
             FROM pending_api_keys WHERE secret_token = ?1",
        )
        .bind(secret_token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| PendingApiKey {
            secret_token: row.get("secret_token"),
            api_key: row.get("api_key"),
            user_email: row.get("user_email"),
            created_by: row.get("created_by"),
            created_at: row.get("created_at"),
            expires_at: row.get("expires_at"),
            viewed: row.get("viewed"),
            ip_address: row.get("ip_address"),
        }))
    }

    async fn try_mark_viewed(&self, secret_token: &str, ip_address: &str) -> Result<bool> {
        // The `AND viewed = 0` predicate is what makes this a conditional
        // update: two concurrent claims race on this single UPDATE and only
        // one can affect a row (spec.md §4.4, invariant 2 of §8).
        let rows_affected = sqlx::query(
            "UPDATE pending_api_keys SET viewed = 1, ip_address = ?2 WHERE secret_token = ?1 AND viewed = 0",
        )
        .bind(secret_token)
        .bind(ip_address)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows_affected > 0)
    }

    async fn delete(&self, secret_token: &str) -> Result<()> {
        sqlx::query("DELETE FROM pending_api_keys WHERE secret_token = ?1")
            .bind(secret_token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ApiKeyBindingRepository for Sqlite {
    async fn insert(&self, key_hash: &str, user_email: &str) -> Result<()> {
        sqlx::query("INSERT INTO api_key_bindings (key_hash, user_email) VALUES (?1, ?2)")
            .bind(key_hash)
            .bind(user_email)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_user_email(&self, key_hash: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT user_email FROM api_key_bindings WHERE key_hash = ?1")
            .bind(key_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get("user_email")))
    }
}
