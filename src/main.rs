//! Trapline CLI entry point.

use clap::Parser;

use trapline::cli::commands;
use trapline::cli::{Cli, Commands};
use trapline::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logging follows the resolved config; a broken config falls back to the
    // defaults and the command itself reports the problem.
    let log_config = commands::load_config(cli.config.as_deref())
        .map(|config| LogConfig::from(&config.logging))
        .unwrap_or_default();
    let _logger = match LoggerImpl::init(&log_config) {
        Ok(logger) => Some(logger),
        Err(err) => {
            eprintln!("warning: logging disabled: {err:#}");
            None
        }
    };

    let config_path = cli.config.as_deref();
    let result = match cli.command {
        Commands::Run(args) => commands::run::execute(args, config_path, cli.json).await,
        Commands::Validate(args) => commands::validate::execute(args, config_path, cli.json).await,
        Commands::Config(args) => commands::config::execute(args, config_path, cli.json).await,
    };

    if let Err(err) = result {
        trapline::cli::handle_error(err, cli.json);
    }
}
