mod builder;
mod handlers;
mod ws;

pub use builder::{ApiBuilder, RouterState};

use std::net::SocketAddr;
use std::sync::Arc;

use taskctl_common::signal::shutdown_signal;

use crate::push_channel::PushChannelManager;

pub async fn serve(router: axum::Router, address: SocketAddr, push: Arc<PushChannelManager>) {
    axum::Server::bind(&address)
        .serve(router.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            push.close_all().await;
        })
        .await
        .unwrap_or_else(|err| panic!("failed to bind to {address}: {err}"));
}
