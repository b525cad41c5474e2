use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{migrate::MigrateDatabase, sqlite::SqliteConnectOptions, Row, SqlitePool};
use taskctl_backends::repositories::{ConnectionRepository, ExecutionRepository, ImageRepository, SecretRepository};
use taskctl_backends::value_store::ValueStore;
use taskctl_common::{
    models::execution::{Execution, Status},
    models::image::ImageRegistration,
    models::secret::SecretMetadata,
    models::stream::{Functionality, StreamConnection},
    Error, ErrorKind, Result,
};

static MIGRATIONS: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// sqlx-backed implementation of every repository this binary owns, plus the
/// secret value store. Mirrors `taskctl_auth::dal::Sqlite`: one pool, one
/// migrator, cloned rather than recreated per caller.
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

fn execution_from_row(row: sqlx::sqlite::SqliteRow) -> Execution {
    let status: String = row.get("status");
    Execution {
        execution_id: row.get("execution_id"),
        user_email: row.get("user_email"),
        command: row.get("command"),
        status: status.parse().expect("status column holds a valid Status"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        exit_code: row.get("exit_code"),
        request_id: row.get("request_id"),
        compute_platform: row.get("compute_platform"),
    }
}

#[async_trait]
impl ExecutionRepository for Sqlite {
    async fn insert(&self, execution: Execution) -> Result<()> {
        sqlx::query(
            "INSERT INTO executions
                (execution_id, user_email, command, status, started_at, completed_at, exit_code, request_id, compute_platform)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&execution.execution_id)
        .bind(&execution.user_email)
        .bind(&execution.command)
        .bind(execution.status.to_string())
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(execution.exit_code)
        .bind(&execution.request_id)
        .bind(&execution.compute_platform)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, execution_id: &str) -> Result<Option<Execution>> {
        let row = sqlx::query("SELECT * FROM executions WHERE execution_id = ?1")
            .bind(execution_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(execution_from_row))
    }

    async fn list(&self) -> Result<Vec<Execution>> {
        let rows = sqlx::query("SELECT * FROM executions ORDER BY started_at DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(execution_from_row).collect())
    }

    async fn update_terminal(
        &self,
        execution_id: &str,
        status: Status,
        completed_at: DateTime<Utc>,
        exit_code: Option<i32>,
    ) -> Result<()> {
        let rows_affected = sqlx::query(
            "UPDATE executions SET status = ?1, completed_at = ?2, exit_code = ?3 WHERE execution_id = ?4",
        )
        .bind(status.to_string())
        .bind(completed_at)
        .bind(exit_code)
        .bind(execution_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(Error::from_kind(ErrorKind::NotFound));
        }
        Ok(())
    }
}

fn image_from_row(row: sqlx::sqlite::SqliteRow) -> ImageRegistration {
    ImageRegistration {
        image_id: row.get("image_id"),
        registry: row.get("registry"),
        name: row.get("name"),
        tag: row.get("tag"),
        task_template_name: row.get("task_template_name"),
        is_default: row.get("is_default"),
        task_role: row.get("task_role"),
        exec_role: row.get("exec_role"),
        cpu: row.get("cpu"),
        memory: row.get("memory"),
        runtime_platform: row.get("runtime_platform"),
    }
}

#[async_trait]
impl ImageRepository for Sqlite {
    async fn upsert(&self, image: ImageRegistration) -> Result<()> {
        sqlx::query(
            "INSERT INTO images
                (image_id, registry, name, tag, task_template_name, is_default, task_role, exec_role, cpu, memory, runtime_platform)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT (image_id) DO UPDATE SET
                task_template_name = excluded.task_template_name,
                is_default = excluded.is_default,
                task_role = excluded.task_role,
                exec_role = excluded.exec_role,
                cpu = excluded.cpu,
                memory = excluded.memory,
                runtime_platform = excluded.runtime_platform",
        )
        .bind(&image.image_id)
        .bind(&image.registry)
        .bind(&image.name)
        .bind(&image.tag)
        .bind(&image.task_template_name)
        .bind(image.is_default)
        .bind(&image.task_role)
        .bind(&image.exec_role)
        .bind(image.cpu)
        .bind(image.memory)
        .bind(&image.runtime_platform)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_id(&self, image_id: &str) -> Result<Option<ImageRegistration>> {
        let row = sqlx::query("SELECT * FROM images WHERE image_id = ?1")
            .bind(image_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(image_from_row))
    }

    async fn get_any_by_ref(&self, image_ref: &str) -> Result<Option<ImageRegistration>> {
        let (path, tag) = image_ref.rsplit_once(':').unwrap_or((image_ref, "latest"));
        let (registry, name) = path.rsplit_once('/').unwrap_or(("", path));

        let row = sqlx::query(
            "SELECT * FROM images WHERE registry = ?1 AND name = ?2 AND tag = ?3 LIMIT 1",
        )
        .bind(registry)
        .bind(name)
        .bind(tag)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(image_from_row))
    }

    async fn get_default(&self) -> Result<Option<ImageRegistration>> {
        let row = sqlx::query("SELECT * FROM images WHERE is_default = 1 LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(image_from_row))
    }

    async fn list(&self) -> Result<Vec<ImageRegistration>> {
        let rows = sqlx::query("SELECT * FROM images").fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(image_from_row).collect())
    }

    async fn clear_default_except(&self, except_image_id: &str) -> Result<()> {
        sqlx::query("UPDATE images SET is_default = 0 WHERE image_id != ?1")
            .bind(except_image_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_by_ref(&self, image_ref: &str) -> Result<Vec<String>> {
        let (path, tag) = image_ref.rsplit_once(':').unwrap_or((image_ref, "latest"));
        let (registry, name) = path.rsplit_once('/').unwrap_or(("", path));

        let rows = sqlx::query(
            "SELECT task_template_name FROM images WHERE registry = ?1 AND name = ?2 AND tag = ?3",
        )
        .bind(registry)
        .bind(name)
        .bind(tag)
        .fetch_all(&self.pool)
        .await?;
        let templates = rows.into_iter().map(|row| row.get("task_template_name")).collect();

        sqlx::query("DELETE FROM images WHERE registry = ?1 AND name = ?2 AND tag = ?3")
            .bind(registry)
            .bind(name)
            .bind(tag)
            .execute(&self.pool)
            .await?;

        Ok(templates)
    }
}

#[async_trait]
impl ConnectionRepository for Sqlite {
    async fn insert_pending(&self, connection: StreamConnection, token: String) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO connections (connection_id, execution_id, functionality, user_email, client_ip_at_creation, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&connection.connection_id)
        .bind(&connection.execution_id)
        .bind(connection.functionality.to_string())
        .bind(&connection.user_email)
        .bind(&connection.client_ip_at_creation)
        .bind(connection.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO stream_tokens (token, connection_id, execution_id, user_email, client_ip_at_creation, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&token)
        .bind(&connection.connection_id)
        .bind(&connection.execution_id)
        .bind(&connection.user_email)
        .bind(&connection.client_ip_at_creation)
        .bind(connection.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn consume_token(&self, token: &str) -> Result<Option<StreamConnection>> {
        let mut tx = self.pool.begin().await?;

        // DELETE ... RETURNING makes the read-then-delete atomic within the
        // transaction: a second concurrent caller finds no row (spec.md §5,
        // §8 invariant 6).
        let row = sqlx::query(
            "DELETE FROM stream_tokens WHERE token = ?1
             RETURNING connection_id, execution_id, user_email, client_ip_at_creation, created_at",
        )
        .bind(token)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        let connection = StreamConnection {
            connection_id: row.get("connection_id"),
            execution_id: row.get("execution_id"),
            functionality: Functionality::LogStreaming,
            user_email: row.get("user_email"),
            client_ip_at_creation: row.get("client_ip_at_creation"),
            created_at: row.get("created_at"),
        };
        tx.commit().await?;
        Ok(Some(connection))
    }

    async fn get_by_execution_id(&self, execution_id: &str) -> Result<Vec<StreamConnection>> {
        let rows = sqlx::query("SELECT * FROM connections WHERE execution_id = ?1")
            .bind(execution_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| StreamConnection {
                connection_id: row.get("connection_id"),
                execution_id: row.get("execution_id"),
                functionality: Functionality::LogStreaming,
                user_email: row.get("user_email"),
                client_ip_at_creation: row.get("client_ip_at_creation"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn delete(&self, connection_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM connections WHERE connection_id = ?1")
            .bind(connection_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_all_for_execution(&self, execution_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM connections WHERE execution_id = ?1")
            .bind(execution_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM stream_tokens WHERE execution_id = ?1")
            .bind(execution_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn secret_from_row(row: sqlx::sqlite::SqliteRow) -> SecretMetadata {
    SecretMetadata {
        name: row.get("name"),
        key_name: row.get("key_name"),
        description: row.get("description"),
        created_by: row.get("created_by"),
        updated_by: row.get("updated_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl SecretRepository for Sqlite {
    async fn insert(&self, secret: SecretMetadata) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO secrets (name, key_name, description, created_by, updated_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&secret.name)
        .bind(&secret.key_name)
        .bind(&secret.description)
        .bind(&secret.created_by)
        .bind(&secret.updated_by)
        .bind(secret.created_at)
        .bind(secret.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(Error::from_kind(ErrorKind::Conflict))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn get(&self, name: &str) -> Result<Option<SecretMetadata>> {
        let row = sqlx::query("SELECT * FROM secrets WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(secret_from_row))
    }

    async fn list(&self) -> Result<Vec<SecretMetadata>> {
        let rows = sqlx::query("SELECT * FROM secrets ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(secret_from_row).collect())
    }

    async fn update(&self, secret: SecretMetadata) -> Result<()> {
        sqlx::query(
            "UPDATE secrets SET key_name = ?1, description = ?2, updated_by = ?3, updated_at = ?4 WHERE name = ?5",
        )
        .bind(&secret.key_name)
        .bind(&secret.description)
        .bind(&secret.updated_by)
        .bind(secret.updated_at)
        .bind(&secret.name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM secrets WHERE name = ?1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ValueStore for Sqlite {
    async fn put(&self, name: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO secret_values (name, value) VALUES (?1, ?2)
             ON CONFLICT (name) DO UPDATE SET value = excluded.value",
        )
        .bind(name)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM secret_values WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get("value")))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM secret_values WHERE name = ?1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
