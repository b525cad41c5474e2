use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::auth_client::AuthClient;
use crate::image_catalog::ImageCatalog;
use crate::orchestrator::ExecutionOrchestrator;
use crate::push_channel::PushChannelManager;
use crate::secrets::SecretService;

use super::handlers::{
    create_secret, delete_secret, get_execution_status, get_image, get_logs, get_secret,
    health, kill_execution, list_executions, list_images, list_secrets, register_image,
    remove_image, run_command, update_secret,
};
use super::ws::stream;

#[derive(Clone)]
pub struct RouterState {
    pub orchestrator: ExecutionOrchestrator,
    pub images: ImageCatalog,
    pub secrets: SecretService,
    pub push: Arc<PushChannelManager>,
    pub auth: AuthClient,
}

pub struct ApiBuilder {
    state: Option<RouterState>,
}

impl Default for ApiBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiBuilder {
    pub fn new() -> Self {
        Self { state: None }
    }

    pub fn with_state(mut self, state: RouterState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn into_router(self) -> Router {
        let state = self.state.expect("router state is required");

        Router::new()
            .route("/run", post(run_command))
            .route("/executions", get(list_executions))
            .route("/executions/:id/status", get(get_execution_status))
            .route("/executions/:id/kill", post(kill_execution))
            .route("/executions/:id/logs", get(get_logs))
            .route("/images/register", post(register_image))
            .route("/images", get(list_images))
            .route(
                "/images/:image_ref",
                get(get_image).delete(remove_image),
            )
            .route("/secrets", post(create_secret).get(list_secrets))
            .route(
                "/secrets/:name",
                get(get_secret).put(update_secret).delete(delete_secret),
            )
            .route("/health", get(health))
            .route("/", get(stream))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}
