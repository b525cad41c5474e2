use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use taskctl_common::{
    models::{
        execution::{KillResponse, LogsResponse, RunRequest, RunResponse},
        image::{ListImagesResponse, RegisterImageRequest},
        secret::{CreateSecretRequest, ListSecretsResponse, SecretResponse, UpdateSecretRequest},
        user::User,
        HealthResponse,
    },
    Result,
};
use tracing::instrument;

use super::builder::RouterState;

async fn current_user(state: &RouterState, headers: &HeaderMap) -> Result<User> {
    let api_key = headers
        .get("X-Api-Key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    state.auth.authenticate(api_key).await
}

#[derive(Deserialize)]
pub struct LogsQuery {
    pub last_seen_timestamp: Option<i64>,
}

#[instrument(skip(state, headers, request))]
pub async fn run_command(
    State(state): State<RouterState>,
    headers: HeaderMap,
    Json(request): Json<RunRequest>,
) -> Result<Json<RunResponse>> {
    let user = current_user(&state, &headers).await?;
    let response = state.orchestrator.run_command(&user.email, request).await?;
    Ok(Json(response))
}

#[instrument(skip(state, headers))]
pub async fn get_execution_status(
    State(state): State<RouterState>,
    headers: HeaderMap,
    Path(execution_id): Path<String>,
) -> Result<Json<taskctl_common::models::execution::ExecutionResponse>> {
    current_user(&state, &headers).await?;
    let response = state.orchestrator.get_execution_status(&execution_id).await?;
    Ok(Json(response))
}

#[instrument(skip(state, headers))]
pub async fn list_executions(
    State(state): State<RouterState>,
    headers: HeaderMap,
) -> Result<Json<Vec<taskctl_common::models::execution::ExecutionResponse>>> {
    current_user(&state, &headers).await?;
    let executions = state.orchestrator.list_executions().await?;
    Ok(Json(executions))
}

#[instrument(skip(state, headers))]
pub async fn kill_execution(
    State(state): State<RouterState>,
    headers: HeaderMap,
    Path(execution_id): Path<String>,
) -> Result<Json<KillResponse>> {
    current_user(&state, &headers).await?;
    let response = state.orchestrator.kill_execution(&execution_id).await?;
    Ok(Json(response))
}

#[instrument(skip(state, headers))]
pub async fn get_logs(
    State(state): State<RouterState>,
    headers: HeaderMap,
    Path(execution_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogsResponse>> {
    let user = current_user(&state, &headers).await?;
    let client_ip = headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    let response = state
        .orchestrator
        .get_logs_by_execution_id(&execution_id, &user.email, client_ip, query.last_seen_timestamp)
        .await?;
    Ok(Json(response))
}

#[instrument(skip(state, headers, request))]
pub async fn register_image(
    State(state): State<RouterState>,
    headers: HeaderMap,
    Json(request): Json<RegisterImageRequest>,
) -> Result<Json<taskctl_common::models::image::ImageRegistration>> {
    current_user(&state, &headers).await?;
    let image = state.images.register_image(request).await?;
    Ok(Json(image))
}

#[instrument(skip(state, headers))]
pub async fn list_images(
    State(state): State<RouterState>,
    headers: HeaderMap,
) -> Result<Json<ListImagesResponse>> {
    current_user(&state, &headers).await?;
    let images = state.images.list_images().await?;
    Ok(Json(ListImagesResponse { images }))
}

#[instrument(skip(state, headers))]
pub async fn get_image(
    State(state): State<RouterState>,
    headers: HeaderMap,
    Path(image_ref): Path<String>,
) -> Result<Json<taskctl_common::models::image::ImageRegistration>> {
    current_user(&state, &headers).await?;
    let image = state.images.get_image(&image_ref).await?;
    Ok(Json(image))
}

#[instrument(skip(state, headers))]
pub async fn remove_image(
    State(state): State<RouterState>,
    headers: HeaderMap,
    Path(image_ref): Path<String>,
) -> Result<()> {
    current_user(&state, &headers).await?;
    state.images.remove_image(&image_ref).await
}

#[instrument(skip(state, headers, request))]
pub async fn create_secret(
    State(state): State<RouterState>,
    headers: HeaderMap,
    Json(request): Json<CreateSecretRequest>,
) -> Result<Json<SecretResponse>> {
    let user = current_user(&state, &headers).await?;
    let metadata = state.secrets.create_secret(request, &user.email).await?;
    Ok(Json(SecretResponse { metadata, value: None }))
}

#[instrument(skip(state, headers))]
pub async fn list_secrets(
    State(state): State<RouterState>,
    headers: HeaderMap,
) -> Result<Json<ListSecretsResponse>> {
    current_user(&state, &headers).await?;
    let secrets = state.secrets.list_secrets().await?;
    Ok(Json(ListSecretsResponse { secrets }))
}

#[instrument(skip(state, headers))]
pub async fn get_secret(
    State(state): State<RouterState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Json<SecretResponse>> {
    current_user(&state, &headers).await?;
    let secret = state.secrets.get_secret(&name, true).await?;
    Ok(Json(secret))
}

#[instrument(skip(state, headers, request))]
pub async fn update_secret(
    State(state): State<RouterState>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(request): Json<UpdateSecretRequest>,
) -> Result<Json<SecretResponse>> {
    let user = current_user(&state, &headers).await?;
    let metadata = state.secrets.update_secret(&name, request, &user.email).await?;
    Ok(Json(SecretResponse { metadata, value: None }))
}

#[instrument(skip(state, headers))]
pub async fn delete_secret(
    State(state): State<RouterState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<()> {
    current_user(&state, &headers).await?;
    state.secrets.delete_secret(&name).await
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        version: env!("CARGO_PKG_VERSION"),
    })
}
