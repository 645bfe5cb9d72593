use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use storage_scriptd::config::Config;
use storage_scriptd::daemon::Daemon;
use storage_scriptd::tracing::init_logging;

/// Storage adapter daemon exposing script-based volume and datapath plugins
/// as RPC services.
#[derive(Parser, Debug)]
#[command(name = "storage-scriptd", version, about)]
struct Args {
    /// Directory containing the volume/ and datapath/ plugin roots.
    #[arg(long, default_value = "/usr/libexec/storage-scriptd")]
    root: PathBuf,

    /// Path of the attached-SR state file.
    #[arg(long, default_value = "/var/run/storage-scriptd/state.json")]
    state: PathBuf,

    /// Directory the per-plugin RPC sockets are bound in.
    #[arg(long, default_value = "/var/run/storage-scriptd/switch")]
    switch_dir: PathBuf,

    /// Emit structured JSON logs (for running under a supervisor).
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config {
        root_dir: args.root,
        state_path: args.state,
        switch_dir: args.switch_dir,
        structured_logging: args.json_logs,
    };

    init_logging(&config)?;

    Daemon::new(config).run().await
}
