#![warn(clippy::all, clippy::pedantic)]

use clap::Parser;
use overseer::Cli;
use overseer::app::dispatch::EXIT_CONFIG;
use overseer::config::Config;
use std::process::ExitCode;
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

fn init_logging(level: &str) {
    let level = Level::from_str(level).unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Warning: failed to install log subscriber: {error}");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load_or_init(cli.config.as_deref()) {
        Ok(config) => config,
        Err(error) => {
            init_logging("info");
            tracing::error!(error = %format!("{error:#}"), "failed to load configuration");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    init_logging(&config.log_level);
    overseer::app::dispatch(cli, config).await
}
