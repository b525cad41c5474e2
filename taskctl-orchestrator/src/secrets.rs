use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use taskctl_backends::repositories::SecretRepository;
use taskctl_backends::value_store::ValueStore;
use taskctl_common::{
    models::secret::{CreateSecretRequest, SecretMetadata, SecretResponse, UpdateSecretRequest},
    Error, ErrorKind, Result,
};
use tracing::{instrument, warn};

/// CRUD over secret metadata/value pairs, plus the launch-time resolver
/// (spec.md §4.5). Mirrors the two-store split of `shuttle_auth`'s API-key
/// hash (metadata) vs plaintext (never persisted) — here both halves are
/// persisted, but in separate capability-gated stores.
#[derive(Clone)]
pub struct SecretService {
    secrets: Arc<dyn SecretRepository>,
    values: Arc<dyn ValueStore>,
}

impl SecretService {
    pub fn new(secrets: Arc<dyn SecretRepository>, values: Arc<dyn ValueStore>) -> Self {
        Self { secrets, values }
    }

    #[instrument(skip(self, request))]
    pub async fn create_secret(
        &self,
        request: CreateSecretRequest,
        created_by: &str,
    ) -> Result<SecretMetadata> {
        if request.name.trim().is_empty() || request.key_name.trim().is_empty() {
            return Err(Error::custom(
                ErrorKind::InvalidRequest,
                "secret name and key_name must not be empty",
            ));
        }

        self.values.put(&request.name, &request.value).await?;

        let now = Utc::now();
        let metadata = SecretMetadata {
            name: request.name.clone(),
            key_name: request.key_name,
            description: request.description,
            created_by: created_by.to_string(),
            updated_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
        };

        if let Err(err) = self.secrets.insert(metadata.clone()).await {
            if let Err(cleanup_err) = self.values.delete(&request.name).await {
                warn!(error = %cleanup_err, "failed to roll back secret value after metadata write failure");
            }
            return Err(err);
        }

        Ok(metadata)
    }

    pub async fn get_secret(&self, name: &str, include_value: bool) -> Result<SecretResponse> {
        let metadata = self
            .secrets
            .get(name)
            .await?
            .ok_or_else(|| Error::from_kind(ErrorKind::NotFound))?;

        let value = if include_value {
            self.values.get(name).await?
        } else {
            None
        };

        Ok(SecretResponse { metadata, value })
    }

    pub async fn list_secrets(&self) -> Result<Vec<SecretMetadata>> {
        self.secrets.list().await
    }

    #[instrument(skip(self, request))]
    pub async fn update_secret(
        &self,
        name: &str,
        request: UpdateSecretRequest,
        updated_by: &str,
    ) -> Result<SecretMetadata> {
        let mut metadata = self
            .secrets
            .get(name)
            .await?
            .ok_or_else(|| Error::from_kind(ErrorKind::NotFound))?;

        if let Some(value) = request.value {
            self.values.put(name, &value).await?;
        }

        if let Some(key_name) = request.key_name {
            metadata.key_name = key_name;
        }
        if let Some(description) = request.description {
            metadata.description = description;
        }
        metadata.updated_by = updated_by.to_string();
        metadata.updated_at = Utc::now();

        self.secrets.update(metadata.clone()).await?;
        Ok(metadata)
    }

    pub async fn delete_secret(&self, name: &str) -> Result<()> {
        self.secrets
            .get(name)
            .await?
            .ok_or_else(|| Error::from_kind(ErrorKind::NotFound))?;

        self.secrets.delete(name).await?;
        if let Err(err) = self.values.delete(name).await {
            warn!(error = %err, %name, "failed to delete secret value after metadata delete");
        }
        Ok(())
    }

    /// `names` -> `{key_name: value}` for injection into an execution's
    /// environment (spec.md §4.5). Caller precedence over these values is
    /// enforced by the orchestrator, not here.
    #[instrument(skip(self))]
    pub async fn resolve_for_execution(&self, names: &[String]) -> Result<BTreeMap<String, String>> {
        if names.is_empty() {
            return Ok(BTreeMap::new());
        }

        let mut seen = std::collections::HashSet::new();
        let mut resolved = BTreeMap::new();

        for raw in names {
            let name = raw.trim();
            if name.is_empty() {
                return Err(Error::custom(ErrorKind::InvalidRequest, "secret name must not be blank"));
            }
            if !seen.insert(name.to_string()) {
                continue;
            }

            let metadata = self.secrets.get(name).await?.ok_or_else(|| {
                Error::custom(ErrorKind::InvalidRequest, format!("secret {name} not found"))
            })?;
            if metadata.key_name.trim().is_empty() {
                return Err(Error::custom(
                    ErrorKind::Internal,
                    format!("secret {name} has no key_name"),
                ));
            }

            let value = self.values.get(name).await?.ok_or_else(|| {
                Error::custom(ErrorKind::InvalidRequest, format!("secret {name} not found"))
            })?;

            resolved.insert(metadata.key_name, value);
        }

        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskctl_backends::fakes::InMemorySecrets;
    use taskctl_backends::value_store::fake::FakeValueStore;

    fn service() -> SecretService {
        SecretService::new(
            Arc::new(InMemorySecrets::default()),
            Arc::new(FakeValueStore::default()),
        )
    }

    #[tokio::test]
    async fn create_then_get_round_trips_value() {
        let svc = service();
        svc.create_secret(
            CreateSecretRequest {
                name: "db".into(),
                key_name: "DB_URL".into(),
                description: "".into(),
                value: "postgres://x".into(),
            },
            "admin@x.io",
        )
        .await
        .unwrap();

        let resp = svc.get_secret("db", true).await.unwrap();
        assert_eq!(resp.value.as_deref(), Some("postgres://x"));

        let listed = svc.get_secret("db", false).await.unwrap();
        assert_eq!(listed.value, None);
    }

    #[tokio::test]
    async fn duplicate_create_conflicts() {
        let svc = service();
        let req = CreateSecretRequest {
            name: "db".into(),
            key_name: "DB_URL".into(),
            description: "".into(),
            value: "v1".into(),
        };
        svc.create_secret(req.clone(), "admin@x.io").await.unwrap();
        let err = svc.create_secret(req, "admin@x.io").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn empty_names_resolve_to_empty_map() {
        let svc = service();
        let resolved = svc.resolve_for_execution(&[]).await.unwrap();
        assert!(resolved.is_empty());
    }

    #[tokio::test]
    async fn resolve_deduplicates_and_maps_key_names() {
        let svc = service();
        svc.create_secret(
            CreateSecretRequest {
                name: "db".into(),
                key_name: "DB_URL".into(),
                description: "".into(),
                value: "postgres://x".into(),
            },
            "admin@x.io",
        )
        .await
        .unwrap();

        let resolved = svc
            .resolve_for_execution(&["db".to_string(), "db".to_string()])
            .await
            .unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved.get("DB_URL").unwrap(), "postgres://x");
    }

    #[tokio::test]
    async fn missing_secret_is_invalid_request() {
        let svc = service();
        let err = svc
            .resolve_for_execution(&["missing".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }
}
