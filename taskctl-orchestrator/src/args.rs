use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "taskctl-orchestrator")]
pub struct Args {
    /// Directory holding the sqlite state file.
    #[arg(long, env = "TASKCTL_ORCHESTRATOR_STATE_DIR", default_value = ".")]
    pub state: PathBuf,

    #[arg(long, env = "TASKCTL_ORCHESTRATOR_ADDR", default_value = "127.0.0.1:8001")]
    pub address: SocketAddr,

    /// Base URL of the `taskctl-auth` service, used to verify `X-Api-Key`.
    #[arg(long, env = "TASKCTL_AUTH_URL", default_value = "http://127.0.0.1:8002")]
    pub auth_url: String,

    /// Host:port advertised in minted `wss://` stream URLs. Unset disables
    /// log push-streaming (spec.md §4.1's `GetLogsByExecutionID`).
    #[arg(long, env = "TASKCTL_PUSH_CHANNEL_BASE_URL")]
    pub push_channel_base_url: Option<String>,

    /// Opaque tag recorded on every execution (spec.md §3).
    #[arg(long, env = "TASKCTL_COMPUTE_PLATFORM", default_value = "local-process")]
    pub compute_platform: String,
}
