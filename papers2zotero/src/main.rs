use clap::Parser;
use papers2zotero::cli::{run, Cli, Commands};
use papers2zotero::load_config::peek_log_level;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn log_filter(cli: &Cli) -> EnvFilter {
    let from_file = match &cli.command {
        Commands::Sync(args) => args.config.as_deref().and_then(peek_log_level),
    };
    match cli.log_level.clone().or(from_file) {
        Some(level) => EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("warn")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Initialize tracing for the CLI.
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(&cli))
        .with_writer(std::io::stderr)
        .init();
    tracing::info!("CLI application startup: tracing initialised, environment loaded");

    match run(cli).await {
        Ok(outcome) if outcome.success() => {
            tracing::info!("CLI completed successfully");
            ExitCode::SUCCESS
        }
        Ok(outcome) => {
            tracing::warn!(
                failed_permanent = outcome.report.failed_permanent,
                skipped_failed_permanent = outcome.report.skipped_failed_permanent,
                "CLI completed with permanent failures"
            );
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(error = %e, "CLI exited with error");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
