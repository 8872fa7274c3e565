use clap::Parser;
use ldapsync::cli::{run, Cli, RunStatus};
use ldapsync::logging;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    if let Err(e) = logging::init(cli.log_level, cli.log_file.as_deref()) {
        eprintln!("ldapsync: {e:#}");
        return ExitCode::from(2);
    }
    tracing::info!("CLI arguments parsed, invoking run");

    match run(cli).await {
        Ok(RunStatus::Clean) => {
            tracing::info!("CLI completed successfully");
            ExitCode::SUCCESS
        }
        Ok(RunStatus::Failed) => {
            tracing::warn!("CLI completed with failures");
            ExitCode::from(1)
        }
        Err(e) => {
            tracing::error!(error = %e, "CLI exited with error");
            eprintln!("ldapsync: {e:#}");
            ExitCode::from(2)
        }
    }
}
