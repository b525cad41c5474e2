use std::sync::Arc;

use clap::Parser;
use taskctl_common::tracing::{setup_tracing, Backend};
use taskctl_orchestrator::api::{ApiBuilder, RouterState};
use taskctl_orchestrator::auth_client::AuthClient;
use taskctl_orchestrator::dal::Sqlite;
use taskctl_orchestrator::image_catalog::ImageCatalog;
use taskctl_orchestrator::lifecycle;
use taskctl_orchestrator::push_channel::PushChannelManager;
use taskctl_orchestrator::runner::ProcessRunner;
use taskctl_orchestrator::secrets::SecretService;
use taskctl_orchestrator::{Args, ExecutionOrchestrator};
use tracing::info;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    setup_tracing(Backend::Orchestrator);

    let db_path = args.state.join("taskctl-orchestrator.sqlite");
    let dal = Sqlite::new(db_path.to_str().expect("state path is valid utf-8")).await;
    let dal = Arc::new(dal);

    let (runner, lifecycle_events) = ProcessRunner::new();

    let images = ImageCatalog::new(dal.clone(), runner.clone());
    let secrets = SecretService::new(dal.clone(), dal.clone());
    let push = Arc::new(PushChannelManager::new(
        dal.clone(),
        dal.clone(),
        args.push_channel_base_url.clone(),
    ));

    lifecycle::spawn(lifecycle_events, dal.clone(), push.clone());

    let orchestrator = ExecutionOrchestrator::new(
        runner,
        dal,
        images.clone(),
        secrets.clone(),
        push.clone(),
        args.compute_platform,
    );

    let auth = AuthClient::new(args.auth_url);

    let router = ApiBuilder::new()
        .with_state(RouterState {
            orchestrator,
            images,
            secrets,
            push: push.clone(),
            auth,
        })
        .into_router();

    info!(address = %args.address, "starting taskctl-orchestrator");
    taskctl_orchestrator::api::serve(router, args.address, push).await;
}
