//! stubwheel - reproducible stub source archives for binary Python packages

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use stubwheel_cli::cmd;
use stubwheel_cli::{Cli, Commands, LOG_ENV};

const DEFAULT_FILTER: &str = "info";

fn init_logging() {
    let directives = std::env::var(LOG_ENV)
        .or_else(|_| std::env::var(EnvFilter::DEFAULT_ENV))
        .unwrap_or_else(|_| DEFAULT_FILTER.to_string());
    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|e| {
        eprintln!("warning: ignoring invalid log filter {directives:?}: {e}");
        EnvFilter::new(DEFAULT_FILTER)
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sdist {
            source,
            project_dir,
            out_dir,
        } => cmd::sdist::sdist(&source, &project_dir, &out_dir),
        Commands::Fetch {
            project_dir,
            out_dir,
            system,
        } => cmd::fetch::fetch(&project_dir, &out_dir, &system.into()).await,
        Commands::Tags { system } => cmd::tags::tags(&system.into()),
        Commands::Inspect { filename } => cmd::inspect::inspect(&filename),
    }
}
