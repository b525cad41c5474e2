use async_trait::async_trait;
use chrono::{DateTime, Utc};
use taskctl_common::{
    models::{
        execution::{Execution, Status},
        image::ImageRegistration,
        secret::SecretMetadata,
        stream::StreamConnection,
        user::{PendingApiKey, User},
    },
    Result,
};

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn insert(&self, user: User) -> Result<()>;
    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn list(&self) -> Result<Vec<User>>;
    async fn set_revoked(&self, email: &str, revoked: bool) -> Result<bool>;
    /// Best-effort touch; failure is never surfaced to the caller.
    async fn update_last_used(&self, email: &str, at: DateTime<Utc>) -> Result<()>;
    /// Removes `expires_at`, promoting a pending user to permanent. Returns
    /// `false` if the user did not exist.
    async fn clear_expiration(&self, email: &str) -> Result<bool>;
}

#[async_trait]
pub trait PendingApiKeyRepository: Send + Sync {
    async fn insert(&self, key: PendingApiKey) -> Result<()>;
    async fn get_by_token(&self, secret_token: &str) -> Result<Option<PendingApiKey>>;
    /// Atomically transitions `viewed` from `false` to `true`, recording
    /// `ip_address` in the same update. Returns `true` only if this call
    /// performed the transition (single-use).
    async fn try_mark_viewed(&self, secret_token: &str, ip_address: &str) -> Result<bool>;
    async fn delete(&self, secret_token: &str) -> Result<()>;
}

#[async_trait]
pub trait ApiKeyBindingRepository: Send + Sync {
    /// `key_hash` is the cryptographic hash of the plaintext API key; the
    /// plaintext itself is never stored (spec.md §4.4 invariant).
    async fn insert(&self, key_hash: &str, user_email: &str) -> Result<()>;
    async fn get_user_email(&self, key_hash: &str) -> Result<Option<String>>;
}

#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    async fn insert(&self, execution: Execution) -> Result<()>;
    async fn get(&self, execution_id: &str) -> Result<Option<Execution>>;
    async fn list(&self) -> Result<Vec<Execution>>;
    async fn update_terminal(
        &self,
        execution_id: &str,
        status: Status,
        completed_at: DateTime<Utc>,
        exit_code: Option<i32>,
    ) -> Result<()>;
}

#[async_trait]
pub trait ImageRepository: Send + Sync {
    async fn upsert(&self, image: ImageRegistration) -> Result<()>;
    async fn get_by_id(&self, image_id: &str) -> Result<Option<ImageRegistration>>;
    /// Returns any registered variant for a bare image reference
    /// (`registry/name:tag` without the `image_id` suffix).
    async fn get_any_by_ref(&self, image_ref: &str) -> Result<Option<ImageRegistration>>;
    async fn get_default(&self) -> Result<Option<ImageRegistration>>;
    async fn list(&self) -> Result<Vec<ImageRegistration>>;
    /// Clears `is_default` on every row except `except_image_id`.
    async fn clear_default_except(&self, except_image_id: &str) -> Result<()>;
    /// Deletes every row whose `name:tag` matches `image_ref`, returning the
    /// removed rows' `task_template_name`s for runner-side cleanup.
    async fn delete_by_ref(&self, image_ref: &str) -> Result<Vec<String>>;
}

#[async_trait]
pub trait ConnectionRepository: Send + Sync {
    async fn insert_pending(&self, connection: StreamConnection, token: String) -> Result<()>;
    /// Atomically consumes a stream token: deletes it and promotes the
    /// owning connection from pending to active. Returns `None` if the
    /// token is absent or already consumed.
    async fn consume_token(&self, token: &str) -> Result<Option<StreamConnection>>;
    async fn get_by_execution_id(&self, execution_id: &str) -> Result<Vec<StreamConnection>>;
    async fn delete(&self, connection_id: &str) -> Result<()>;
    async fn delete_all_for_execution(&self, execution_id: &str) -> Result<()>;
}

#[async_trait]
pub trait SecretRepository: Send + Sync {
    /// Fails with `Conflict` if `name` already exists (spec.md §4.5
    /// "second writer sees CONFLICT").
    async fn insert(&self, secret: SecretMetadata) -> Result<()>;
    async fn get(&self, name: &str) -> Result<Option<SecretMetadata>>;
    async fn list(&self) -> Result<Vec<SecretMetadata>>;
    async fn update(&self, secret: SecretMetadata) -> Result<()>;
    async fn delete(&self, name: &str) -> Result<()>;
}
