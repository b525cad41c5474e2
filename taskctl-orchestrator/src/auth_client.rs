use taskctl_common::{models::user::User, Error, ErrorKind, Result};
use tracing::instrument;

/// Calls out to `taskctl-auth`'s `/auth/verify` to turn an `X-Api-Key` header
/// into a [`User`]. The orchestrator never holds a credential store itself —
/// authentication is entirely delegated, mirroring how `shuttle_gateway`
/// verifies callers against `shuttle-auth` rather than re-implementing key
/// checks locally.
#[derive(Clone)]
pub struct AuthClient {
    http: reqwest::Client,
    base_url: String,
}

impl AuthClient {
    pub fn new(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    #[instrument(skip(self, api_key))]
    pub async fn authenticate(&self, api_key: &str) -> Result<User> {
        if api_key.is_empty() {
            return Err(Error::from_kind(ErrorKind::InvalidRequest));
        }

        let response = self
            .http
            .get(format!("{}/auth/verify", self.base_url))
            .header("X-Api-Key", api_key)
            .send()
            .await
            .map_err(|err| Error::source(ErrorKind::ServiceUnavailable, err))?;

        match response.status() {
            status if status.is_success() => response
                .json::<User>()
                .await
                .map_err(|err| Error::source(ErrorKind::Internal, err)),
            reqwest::StatusCode::UNAUTHORIZED => Err(Error::from_kind(ErrorKind::InvalidApiKey)),
            reqwest::StatusCode::FORBIDDEN => Err(Error::from_kind(ErrorKind::ApiKeyRevoked)),
            _ => Err(Error::from_kind(ErrorKind::ServiceUnavailable)),
        }
    }
}
