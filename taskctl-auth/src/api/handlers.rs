use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use taskctl_common::{
    models::{
        user::{
            ClaimResponse, CreateUserRequest, CreateUserResponse, ListUsersResponse,
            RevokeUserRequest, RevokeUserResponse,
        },
        HealthResponse,
    },
    Result,
};
use tracing::instrument;

use super::builder::RouterState;

#[instrument(skip(state))]
pub async fn create_user(
    State(state): State<RouterState>,
    Json(request): Json<CreateUserRequest>,
) -> Result<Json<CreateUserResponse>> {
    let caller = "admin@taskctl".to_string();
    let response = state
        .service
        .create_user(&request.email, &caller, request.api_key)
        .await?;
    Ok(Json(response))
}

#[instrument(skip(state))]
pub async fn revoke_user(
    State(state): State<RouterState>,
    Json(request): Json<RevokeUserRequest>,
) -> Result<Json<RevokeUserResponse>> {
    state.service.revoke_user(&request.email).await?;
    Ok(Json(RevokeUserResponse {
        email: request.email,
    }))
}

#[instrument(skip(state))]
pub async fn list_users(State(state): State<RouterState>) -> Result<Json<ListUsersResponse>> {
    let users = state.service.list_users().await?;
    Ok(Json(ListUsersResponse { users }))
}

#[instrument(skip(state, headers))]
pub async fn claim_api_key(
    State(state): State<RouterState>,
    headers: HeaderMap,
    Path(token): Path<String>,
) -> Result<Json<ClaimResponse>> {
    // The claim endpoint has no authentication header; a forwarded-for
    // header stands in for `client_ip` (spec.md §3 PendingAPIKey claim audit
    // field), same extraction the orchestrator uses for its logs endpoint.
    let client_ip = headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    let response = state.service.claim_api_key(&token, client_ip).await?;
    Ok(Json(response))
}

/// Called by the orchestrator (and any other internal caller) to turn an
/// `X-Api-Key` header into a [`User`](taskctl_common::models::user::User).
/// This is the network-boundary form of `AuthenticateUser` (spec.md §4.4);
/// the request surface elsewhere only ever holds a hash, never a plaintext
/// key to compare against, so authentication always round-trips through
/// this endpoint.
#[instrument(skip(state, headers))]
pub async fn authenticate(
    State(state): State<RouterState>,
    headers: HeaderMap,
) -> Result<Json<taskctl_common::models::user::User>> {
    let api_key = headers
        .get("X-Api-Key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let user = state.service.authenticate_user(api_key).await?;
    state.service.update_last_used(&user.email).await;
    Ok(Json(user))
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        version: env!("CARGO_PKG_VERSION"),
    })
}
