mod bootstrap;
mod cli;
mod commands;

use std::process::ExitCode;
use std::sync::Arc;

use nfsen_core::settings::Config;

use crate::cli::Cli;
use crate::commands::Context;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::parse_from_env_args(std::env::args_os()) {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };

    let settings_path = bootstrap::settings_path(cli.settings.as_ref());
    let config = match Config::load(&settings_path) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            // No settings means no configured level; fall back to the CLI flags or INFO.
            if let Err(log_err) = bootstrap::setup_logging(cli.effective_log_level("INFO")) {
                eprintln!("Failed to initialise logging: {log_err}");
            }
            bootstrap::report_fatal("cannot load settings", &e);
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = bootstrap::setup_logging(cli.effective_log_level(&config.log_level)) {
        eprintln!("Failed to initialise logging: {e}");
    }
    if let Err(e) = bootstrap::ensure_directories(&config) {
        bootstrap::report_fatal("cannot create state directories", &e);
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    tracing::debug!(
        settings = %settings_path.display(),
        sources = config.sources.len(),
        "nfsen-ng v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let ctx = Context {
        cli,
        config,
        settings_path,
    };
    match commands::dispatch(&ctx).await {
        Ok(code) => code,
        Err(e) => {
            bootstrap::report_fatal("command failed", &e);
            eprintln!("{e}");
            ExitCode::from(commands::exit_code_for(&e))
        }
    }
}
