//! In-memory repository fakes for unit tests, mirroring the role
//! `shuttle_backends::test_utils` plays for the teacher's integration tests:
//! components are written against the traits in [`crate::repositories`] and
//! tested here without a database.
#![cfg(feature = "test-utils")]

use std::collections::HashMap;
use std::sync::Mutex;

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
    Error, ErrorKind, Result,
};

use crate::repositories::{
    ApiKeyBindingRepository, ConnectionRepository, ExecutionRepository, ImageRepository,
    PendingApiKeyRepository, SecretRepository, UserRepository,
};

/// Mirrors `taskctl_orchestrator::image_catalog::render_ref`'s empty-registry
/// special case so the fake agrees with the real resolver on what a bare
/// reference like `"a:1"` looks like.
fn render_ref(registry: &str, name: &str, tag: &str) -> String {
    if registry.is_empty() {
        format!("{name}:{tag}")
    } else {
        format!("{registry}/{name}:{tag}")
    }
}

#[derive(Default)]
pub struct InMemoryUsers {
    users: Mutex<HashMap<String, User>>,
}

#[async_trait]
impl UserRepository for InMemoryUsers {
    async fn insert(&self, user: User) -> Result<()> {
        self.users.lock().unwrap().insert(user.email.clone(), user);
        Ok(())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self.users.lock().unwrap().get(email).cloned())
    }

    async fn list(&self) -> Result<Vec<User>> {
        let mut users: Vec<User> = self.users.lock().unwrap().values().cloned().collect();
        users.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(users)
    }

    async fn set_revoked(&self, email: &str, revoked: bool) -> Result<bool> {
        let mut users = self.users.lock().unwrap();
        match users.get_mut(email) {
            Some(user) => {
                user.revoked = revoked;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_last_used(&self, email: &str, at: DateTime<Utc>) -> Result<()> {
        if let Some(user) = self.users.lock().unwrap().get_mut(email) {
            user.last_used = Some(at);
        }
        Ok(())
    }

    async fn clear_expiration(&self, email: &str) -> Result<bool> {
        let mut users = self.users.lock().unwrap();
        match users.get_mut(email) {
            Some(user) => {
                user.expires_at = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct InMemoryPendingKeys {
    keys: Mutex<HashMap<String, PendingApiKey>>,
}

#[async_trait]
impl PendingApiKeyRepository for InMemoryPendingKeys {
    async fn insert(&self, key: PendingApiKey) -> Result<()> {
        self.keys
            .lock()
            .unwrap()
            .insert(key.secret_token.clone(), key);
        Ok(())
    }

    async fn get_by_token(&self, secret_token: &str) -> Result<Option<PendingApiKey>> {
        Ok(self.keys.lock().unwrap().get(secret_token).cloned())
    }

    async fn try_mark_viewed(&self, secret_token: &str, ip_address: &str) -> Result<bool> {
        let mut keys = self.keys.lock().unwrap();
        match keys.get_mut(secret_token) {
            Some(key) if !key.viewed => {
                key.viewed = true;
                key.ip_address = Some(ip_address.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, secret_token: &str) -> Result<()> {
        self.keys.lock().unwrap().remove(secret_token);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryApiKeyBindings {
    bindings: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl ApiKeyBindingRepository for InMemoryApiKeyBindings {
    async fn insert(&self, key_hash: &str, user_email: &str) -> Result<()> {
        self.bindings
            .lock()
            .unwrap()
            .insert(key_hash.to_string(), user_email.to_string());
        Ok(())
    }

    async fn get_user_email(&self, key_hash: &str) -> Result<Option<String>> {
        Ok(self.bindings.lock().unwrap().get(key_hash).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryExecutions {
    executions: Mutex<HashMap<String, Execution>>,
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutions {
    async fn insert(&self, execution: Execution) -> Result<()> {
        self.executions
            .lock()
            .unwrap()
            .insert(execution.execution_id.clone(), execution);
        Ok(())
    }

    async fn get(&self, execution_id: &str) -> Result<Option<Execution>> {
        Ok(self.executions.lock().unwrap().get(execution_id).cloned())
    }

    async fn list(&self) -> Result<Vec<Execution>> {
        Ok(self.executions.lock().unwrap().values().cloned().collect())
    }

    async fn update_terminal(
        &self,
        execution_id: &str,
        status: Status,
        completed_at: DateTime<Utc>,
        exit_code: Option<i32>,
    ) -> Result<()> {
        let mut executions = self.executions.lock().unwrap();
        match executions.get_mut(execution_id) {
            Some(execution) => {
                execution.status = status;
                execution.completed_at = Some(completed_at);
                execution.exit_code = exit_code;
                Ok(())
            }
            None => Err(Error::from_kind(ErrorKind::NotFound)),
        }
    }
}

#[derive(Default)]
pub struct InMemoryImages {
    images: Mutex<HashMap<String, ImageRegistration>>,
}

#[async_trait]
impl ImageRepository for InMemoryImages {
    async fn upsert(&self, image: ImageRegistration) -> Result<()> {
        self.images
            .lock()
            .unwrap()
            .insert(image.image_id.clone(), image);
        Ok(())
    }

    async fn get_by_id(&self, image_id: &str) -> Result<Option<ImageRegistration>> {
        Ok(self.images.lock().unwrap().get(image_id).cloned())
    }

    async fn get_any_by_ref(&self, image_ref: &str) -> Result<Option<ImageRegistration>> {
        Ok(self
            .images
            .lock()
            .unwrap()
            .values()
            .find(|i| render_ref(&i.registry, &i.name, &i.tag) == image_ref)
            .cloned())
    }

    async fn get_default(&self) -> Result<Option<ImageRegistration>> {
        Ok(self
            .images
            .lock()
            .unwrap()
            .values()
            .find(|i| i.is_default)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<ImageRegistration>> {
        Ok(self.images.lock().unwrap().values().cloned().collect())
    }

    async fn clear_default_except(&self, except_image_id: &str) -> Result<()> {
        for image in self.images.lock().unwrap().values_mut() {
            if image.image_id != except_image_id {
                image.is_default = false;
            }
        }
        Ok(())
    }

    async fn delete_by_ref(&self, image_ref: &str) -> Result<Vec<String>> {
        let mut images = self.images.lock().unwrap();
        let matching: Vec<String> = images
            .values()
            .filter(|i| render_ref(&i.registry, &i.name, &i.tag) == image_ref)
            .map(|i| i.image_id.clone())
            .collect();
        let templates = matching
            .iter()
            .filter_map(|id| images.get(id).map(|i| i.task_template_name.clone()))
            .collect();
        for id in matching {
            images.remove(&id);
        }
        Ok(templates)
    }
}

#[derive(Default)]
pub struct InMemoryConnections {
    pending_tokens: Mutex<HashMap<String, StreamConnection>>,
    active: Mutex<HashMap<String, StreamConnection>>,
}

#[async_trait]
impl ConnectionRepository for InMemoryConnections {
    async fn insert_pending(&self, connection: StreamConnection, token: String) -> Result<()> {
        self.pending_tokens.lock().unwrap().insert(token, connection);
        Ok(())
    }

    async fn consume_token(&self, token: &str) -> Result<Option<StreamConnection>> {
        let connection = self.pending_tokens.lock().unwrap().remove(token);
        if let Some(connection) = connection.clone() {
            self.active
                .lock()
                .unwrap()
                .insert(connection.connection_id.clone(), connection);
        }
        Ok(connection)
    }

    async fn get_by_execution_id(&self, execution_id: &str) -> Result<Vec<StreamConnection>> {
        Ok(self
            .active
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.execution_id == execution_id)
            .cloned()
            .collect())
    }

    async fn delete(&self, connection_id: &str) -> Result<()> {
        self.active.lock().unwrap().remove(connection_id);
        Ok(())
    }

    async fn delete_all_for_execution(&self, execution_id: &str) -> Result<()> {
        self.active.lock().unwrap().retain(|_, c| c.execution_id != execution_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySecrets {
    secrets: Mutex<HashMap<String, SecretMetadata>>,
}

#[async_trait]
impl SecretRepository for InMemorySecrets {
    async fn insert(&self, secret: SecretMetadata) -> Result<()> {
        let mut secrets = self.secrets.lock().unwrap();
        if secrets.contains_key(&secret.name) {
            return Err(Error::from_kind(ErrorKind::Conflict));
        }
        secrets.insert(secret.name.clone(), secret);
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<SecretMetadata>> {
        Ok(self.secrets.lock().unwrap().get(name).cloned())
    }

    async fn list(&self) -> Result<Vec<SecretMetadata>> {
        Ok(self.secrets.lock().unwrap().values().cloned().collect())
    }

    async fn update(&self, secret: SecretMetadata) -> Result<()> {
        self.secrets
            .lock()
            .unwrap()
            .insert(secret.name.clone(), secret);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.secrets.lock().unwrap().remove(name);
        Ok(())
    }
}
