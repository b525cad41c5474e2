mod builder;
mod handlers;

pub use builder::ApiBuilder;

use std::net::SocketAddr;

use taskctl_common::signal::shutdown_signal;

pub async fn serve(router: axum::Router, address: SocketAddr) {
    axum::Server::bind(&address)
        .serve(router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap_or_else(|err| panic!("failed to bind to {address}: {err}"));
}
