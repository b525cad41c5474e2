use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Secret metadata (spec.md §3, §4.5). The payload lives in the value store,
/// keyed by `name`; it is never included here unless explicitly requested.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SecretMetadata {
    pub name: String,
    pub key_name: String,
    pub description: String,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecretResponse {
    #[serde(flatten)]
    pub metadata: SecretMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CreateSecretRequest {
    pub name: String,
    pub key_name: String,
    #[serde(default)]
    pub description: String,
    pub value: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct UpdateSecretRequest {
    pub key_name: Option<String>,
    pub description: Option<String>,
    pub value: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListSecretsResponse {
    pub secrets: Vec<SecretMetadata>,
}
