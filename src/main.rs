//! Restore files task - k8up restore to Lagoon task upload

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::error;

use restore_files_task::commands;
use restore_files_task::config::{Cli, Settings, TaskCommand};
use restore_task_common::telemetry::init_logging;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.log_format.into()) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = Settings::from_env(cli);
    let context = match settings.command {
        TaskCommand::Restore => "Failed to restore backup",
        TaskCommand::Upload => "Failed to upload restore to task",
    };
    commands::run(&settings, VERSION).await.context(context)
}
