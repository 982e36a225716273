//! kitchenboard staff binary
//!
//! Loads configuration, initializes tracing, and runs the [`StaffApp`].

use std::path::PathBuf;

use clap::Parser;

use kb_core::config::AppConfig;
use kb_staff::app::StaffApp;

/// Staff order board
#[derive(Parser, Debug)]
#[command(name = "kitchenboard-staff", about = "Live restaurant order board for staff")]
struct Args {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Channel role (`staff`, `customers`, `admin`); overrides the config.
    #[arg(short, long)]
    role: Option<String>,

    /// Human-readable logs instead of JSON.
    #[arg(long)]
    pretty: bool,

    /// Run against an in-memory store with an in-process channel.
    #[arg(long)]
    offline: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = AppConfig::load(args.config)?;
    if let Some(role) = args.role {
        config.channel.role = role;
        config.validate()?;
    }

    kb_core::logging::init_tracing(!args.pretty);

    tracing::info!(
        role = %config.channel.role,
        offline = args.offline,
        console = %config.console.bind_addr,
        "starting kitchenboard-staff"
    );

    StaffApp::new(config, args.offline).run().await
}
