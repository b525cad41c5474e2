use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::service::UserCredentialService;

use super::handlers::{authenticate, claim_api_key, create_user, health, list_users, revoke_user};

#[derive(Clone)]
pub struct RouterState {
    pub service: UserCredentialService,
}

pub struct ApiBuilder {
    service: Option<UserCredentialService>,
}

impl Default for ApiBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiBuilder {
    pub fn new() -> Self {
        Self { service: None }
    }

    pub fn with_service(mut self, service: UserCredentialService) -> Self {
        self.service = Some(service);
        self
    }

    pub fn into_router(self) -> Router {
        let state = RouterState {
            service: self.service.expect("a UserCredentialService is required"),
        };

        Router::new()
            .route("/users/create", post(create_user))
            .route("/users/revoke", post(revoke_user))
            .route("/users", get(list_users))
            .route("/claim/:token", get(claim_api_key))
            .route("/auth/verify", get(authenticate))
            .route("/health", get(health))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}
