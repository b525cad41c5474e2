use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "taskctl-auth")]
pub struct Args {
    /// Directory holding the sqlite state file.
    #[arg(long, env = "TASKCTL_AUTH_STATE_DIR", default_value = ".")]
    pub state: PathBuf,

    #[arg(long, env = "TASKCTL_AUTH_ADDR", default_value = "127.0.0.1:8002")]
    pub address: SocketAddr,
}
