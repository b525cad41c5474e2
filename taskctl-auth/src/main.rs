use std::sync::Arc;

use clap::Parser;
use taskctl_auth::{api::ApiBuilder, dal::Sqlite, Args, UserCredentialService};
use taskctl_common::tracing::{setup_tracing, Backend};
use tracing::info;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    setup_tracing(Backend::Auth);

    let db_path = args.state.join("taskctl-auth.sqlite");
    let dal = Sqlite::new(db_path.to_str().expect("state path is valid utf-8")).await;
    let dal = Arc::new(dal);

    let service = UserCredentialService::new(dal.clone(), dal.clone(), dal);
    let router = ApiBuilder::new().with_service(service).into_router();

    info!(address = %args.address, "starting taskctl-auth");
    taskctl_auth::api::serve(router, args.address).await;
}
