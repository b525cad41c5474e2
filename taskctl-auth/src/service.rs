use std::sync::Arc;

use chrono::Utc;
use taskctl_backends::repositories::{
    ApiKeyBindingRepository, PendingApiKeyRepository, UserRepository,
};
use taskctl_common::{
    crypto::{hash_api_key, random_token},
    models::user::{ClaimResponse, CreateUserResponse, PendingApiKey, User},
    Error, ErrorKind, Result,
};
use tracing::{instrument, warn};

/// One-shot claim tickets expire 15 minutes after issuance (spec.md §4.4).
pub const CLAIM_EXPIRATION: chrono::Duration = chrono::Duration::minutes(15);

fn is_valid_email(email: &str) -> bool {
    // A pragmatic RFC-5322 check: one '@', non-empty local and domain parts,
    // domain contains a dot. Full RFC-5322 grammar is deliberately not
    // implemented; this matches what every production mail-accepting system
    // actually enforces at the edge.
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && domain.contains('.') && !email.contains(' ')
        }
        None => false,
    }
}

#[derive(Clone)]
pub struct UserCredentialService {
    users: Arc<dyn UserRepository>,
    pending_keys: Arc<dyn PendingApiKeyRepository>,
    api_keys: Arc<dyn ApiKeyBindingRepository>,
}

impl UserCredentialService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        pending_keys: Arc<dyn PendingApiKeyRepository>,
        api_keys: Arc<dyn ApiKeyBindingRepository>,
    ) -> Self {
        Self {
            users,
            pending_keys,
            api_keys,
        }
    }

    #[instrument(skip(self, provided_api_key))]
    pub async fn create_user(
        &self,
        email: &str,
        created_by: &str,
        provided_api_key: Option<String>,
    ) -> Result<CreateUserResponse> {
        if !is_valid_email(email) {
            return Err(Error::custom(ErrorKind::InvalidRequest, "invalid email"));
        }

        if let Some(existing) = self.users.get_by_email(email).await? {
            if !existing.revoked {
                return Err(Error::custom(
                    ErrorKind::Conflict,
                    "a user with that email already exists",
                ));
            }
        }

        let api_key = provided_api_key.unwrap_or_else(|| random_token(32));
        let key_hash = hash_api_key(&api_key);

        let now = Utc::now();
        let expires_at = (now + CLAIM_EXPIRATION).timestamp();

        let user = User {
            email: email.to_string(),
            created_at: now,
            revoked: false,
            last_used: None,
            expires_at: Some(expires_at),
        };
        self.users.insert(user.clone()).await?;

        let secret_token = random_token(32);
        let pending = PendingApiKey {
            secret_token: secret_token.clone(),
            api_key: api_key.clone(),
            user_email: email.to_string(),
            created_by: created_by.to_string(),
            created_at: now,
            expires_at,
            viewed: false,
            ip_address: None,
        };

        if let Err(err) = self.pending_keys.insert(pending).await {
            // Roll back: the user row is orphaned without a claim path.
            let _ = self.users.set_revoked(email, true).await;
            return Err(err);
        }

        self.api_keys.insert(&key_hash, email).await?;

        Ok(CreateUserResponse {
            user,
            claim_token: secret_token,
        })
    }

    #[instrument(skip(self))]
    pub async fn claim_api_key(&self, secret_token: &str, client_ip: &str) -> Result<ClaimResponse> {
        let pending = self
            .pending_keys
            .get_by_token(secret_token)
            .await?
            .ok_or_else(|| Error::from_kind(ErrorKind::NotFound))?;

        if pending.viewed {
            return Err(Error::custom(ErrorKind::Conflict, "already claimed"));
        }

        if pending.expires_at < Utc::now().timestamp() {
            return Err(Error::custom(ErrorKind::NotFound, "expired"));
        }

        let claimed = self.pending_keys.try_mark_viewed(secret_token, client_ip).await?;
        if !claimed {
            // Lost the race to a concurrent claim.
            return Err(Error::custom(ErrorKind::Conflict, "already claimed"));
        }

        if let Err(err) = self.users.clear_expiration(&pending.user_email).await {
            warn!(error = %err, "failed to promote user to permanent after claim");
        }

        Ok(ClaimResponse {
            api_key: pending.api_key,
            user_email: pending.user_email,
        })
    }

    #[instrument(skip(self, api_key))]
    pub async fn authenticate_user(&self, api_key: &str) -> Result<User> {
        if api_key.is_empty() {
            return Err(Error::from_kind(ErrorKind::InvalidRequest));
        }

        let key_hash = hash_api_key(api_key);
        let email = self
            .api_keys
            .get_user_email(&key_hash)
            .await?
            .ok_or_else(|| Error::from_kind(ErrorKind::InvalidApiKey))?;

        let user = self
            .users
            .get_by_email(&email)
            .await?
            .ok_or_else(|| Error::from_kind(ErrorKind::InvalidApiKey))?;

        if user.revoked {
            return Err(Error::from_kind(ErrorKind::ApiKeyRevoked));
        }

        Ok(user)
    }

    #[instrument(skip(self))]
    pub async fn revoke_user(&self, email: &str) -> Result<()> {
        let revoked = self.users.set_revoked(email, true).await?;
        if revoked {
            Ok(())
        } else {
            Err(Error::from_kind(ErrorKind::NotFound))
        }
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        self.users.list().await
    }

    /// Best-effort touch (spec.md §7): failures are logged, never surfaced.
    pub async fn update_last_used(&self, email: &str) {
        if let Err(err) = self.users.update_last_used(email, Utc::now()).await {
            warn!(error = %err, "failed to update last_used");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskctl_backends::fakes::{InMemoryApiKeyBindings, InMemoryPendingKeys, InMemoryUsers};

    fn service() -> UserCredentialService {
        UserCredentialService::new(
            Arc::new(InMemoryUsers::default()),
            Arc::new(InMemoryPendingKeys::default()),
            Arc::new(InMemoryApiKeyBindings::default()),
        )
    }

    #[tokio::test]
    async fn create_claim_authenticate_revoke_cycle() {
        let svc = service();

        let created = svc
            .create_user("a@x.io", "admin@x.io", None)
            .await
            .unwrap();
        assert!(created.user.expires_at.is_some());

        let claimed = svc
            .claim_api_key(&created.claim_token, "1.1.1.1")
            .await
            .unwrap();
        assert_eq!(claimed.user_email, "a@x.io");

        let second = svc.claim_api_key(&created.claim_token, "1.1.1.1").await;
        assert_eq!(second.unwrap_err().kind(), ErrorKind::Conflict);

        let user = svc.authenticate_user(&claimed.api_key).await.unwrap();
        assert_eq!(user.email, "a@x.io");
        assert!(!user.revoked);
        assert!(user.expires_at.is_none());

        svc.revoke_user("a@x.io").await.unwrap();
        let err = svc.authenticate_user(&claimed.api_key).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ApiKeyRevoked);
    }

    #[tokio::test]
    async fn invalid_email_rejected() {
        let svc = service();
        let err = svc.create_user("not-an-email", "admin@x.io", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let svc = service();
        svc.create_user("a@x.io", "admin@x.io", None).await.unwrap();
        let err = svc.create_user("a@x.io", "admin@x.io", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn expired_claim_rejected() {
        let pending_keys = Arc::new(InMemoryPendingKeys::default());
        let svc = UserCredentialService::new(
            Arc::new(InMemoryUsers::default()),
            pending_keys.clone(),
            Arc::new(InMemoryApiKeyBindings::default()),
        );

        pending_keys
            .insert(PendingApiKey {
                secret_token: "expired-token".into(),
                api_key: "k".into(),
                user_email: "a@x.io".into(),
                created_by: "admin@x.io".into(),
                created_at: Utc::now() - CLAIM_EXPIRATION - chrono::Duration::minutes(1),
                expires_at: (Utc::now() - chrono::Duration::minutes(1)).timestamp(),
                viewed: false,
                ip_address: None,
            })
            .await
            .unwrap();

        let err = svc.claim_api_key("expired-token", "1.1.1.1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
