use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;

use super::builder::RouterState;

#[derive(Deserialize)]
pub struct StreamQuery {
    pub execution_id: String,
    pub token: String,
}

/// Upgrades the push channel's root route. The URL's `token` query parameter
/// is the sole credential (spec.md §6); there is no `X-Api-Key` header on
/// this path.
pub async fn stream(
    State(state): State<RouterState>,
    Query(query): Query<StreamQuery>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| async move {
        state.push.handle_socket(socket, query.execution_id, query.token).await;
    })
}
