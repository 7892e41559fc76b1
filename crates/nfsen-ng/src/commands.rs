use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use nfsen_core::error::{DaemonError, NfsenError};
use nfsen_core::layout::validate_directory_structure;
use nfsen_core::settings::Config;
use nfsen_core::time_utils::{lookback_start, today};
use nfsen_data::datasource::open_datasource;
use nfsen_data::processor::build_processor;
use nfsen_runtime::control::{DaemonControl, ExecSpawner};
use nfsen_runtime::import::{ImportJob, ImportOrchestrator};
use nfsen_runtime::listener::Listener;
use nfsen_runtime::signal::Shutdown;

use crate::cli::{Cli, Command};

/// Everything a command needs, resolved once in `main`.
pub struct Context {
    pub cli: Cli,
    pub config: Arc<Config>,
    pub settings_path: PathBuf,
}

pub async fn dispatch(ctx: &Context) -> Result<ExitCode> {
    match ctx.cli.command {
        Command::Import => import(ctx).await,
        Command::Start => start(ctx),
        Command::Stop => stop(ctx),
        Command::Status => status(ctx),
        Command::Daemon => daemon(ctx).await,
    }
}

// ── import ─────────────────────────────────────────────────────────────────────

async fn import(ctx: &Context) -> Result<ExitCode> {
    let config = &ctx.config;
    validate_directory_structure(config)?;

    let processor = build_processor(config);
    let datasource = open_datasource(config)?;

    let end = today();
    let start = ctx
        .cli
        .start
        .unwrap_or_else(|| lookback_start(end, ctx.cli.import_years));
    let job = ImportJob {
        sources: config.sources.clone(),
        start,
        end,
        force: ctx.cli.force,
        verbose: ctx.cli.verbose,
        options: ctx.cli.process_options(&config.ports),
        max_processes: config.nfdump.max_processes,
    };

    tracing::info!(
        processor = processor.name(),
        datasource = datasource.name(),
        %start,
        %end,
        force = job.force,
        "starting import"
    );
    let summary = ImportOrchestrator::new(processor, datasource).run(&job).await?;

    println!("Import finished: {summary}");
    for failure in &summary.failures {
        println!("  {} {}: {}", failure.source, failure.day, failure.reason);
    }
    Ok(ExitCode::SUCCESS)
}

// ── start / stop / status ──────────────────────────────────────────────────────

fn start(ctx: &Context) -> Result<ExitCode> {
    let config = &ctx.config;
    validate_directory_structure(config)?;
    build_processor(config).check()?;

    let spawner = ExecSpawner::current_exe(
        ctx.cli.daemon_args(ctx.settings_path.clone()),
        Some(config.daemon.log_file()),
    )?;
    let outcome = DaemonControl::new(&config.daemon.pid_file).start(&spawner)?;
    println!("{outcome}");
    Ok(ExitCode::SUCCESS)
}

fn stop(ctx: &Context) -> Result<ExitCode> {
    let outcome = DaemonControl::new(&ctx.config.daemon.pid_file).stop()?;
    println!("{outcome}");
    Ok(ExitCode::SUCCESS)
}

fn status(ctx: &Context) -> Result<ExitCode> {
    let status = DaemonControl::new(&ctx.config.daemon.pid_file).status()?;
    println!("{status}");
    Ok(ExitCode::SUCCESS)
}

// ── daemon ─────────────────────────────────────────────────────────────────────

async fn daemon(ctx: &Context) -> Result<ExitCode> {
    let config = &ctx.config;
    let control = DaemonControl::new(&config.daemon.pid_file);
    let guard = control.enter_daemon(&config.daemon.lock_file())?;
    tracing::info!(pid = guard.pid(), "nfsen-ng daemon v{} starting", env!("CARGO_PKG_VERSION"));

    validate_directory_structure(config)?;

    let shutdown = Shutdown::new();
    shutdown.install_os_handlers()?;

    let listener = Listener::new(
        build_processor(config),
        open_datasource(config)?,
        config.sources.clone(),
        ctx.cli.process_options(&config.ports),
        config.daemon.poll_interval,
        shutdown,
    );
    listener.run().await?;

    drop(guard);
    Ok(ExitCode::SUCCESS)
}

// ── Exit codes ─────────────────────────────────────────────────────────────────

/// Process exit code for a failed command.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    let daemon = err.downcast_ref::<DaemonError>().or_else(|| {
        match err.downcast_ref::<NfsenError>() {
            Some(NfsenError::Daemon(inner)) => Some(inner),
            _ => None,
        }
    });
    daemon
        .map(DaemonError::exit_code)
        .and_then(|code| u8::try_from(code).ok())
        .unwrap_or(1)
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use nfsen_core::error::ProcessorError;

    #[test]
    fn test_exit_code_for_daemon_errors() {
        let lock = anyhow::Error::new(DaemonError::LockFile {
            path: PathBuf::from("/run/nfsen-ng.lock"),
            reason: "denied".to_string(),
        });
        assert_eq!(exit_code_for(&lock), 128);

        let duplicate = anyhow::Error::new(NfsenError::Daemon(DaemonError::DuplicateInstance));
        assert_eq!(exit_code_for(&duplicate), 129);

        let unconfirmed = anyhow::Error::new(DaemonError::PidNotConfirmed);
        assert_eq!(exit_code_for(&unconfirmed), 1);
    }

    #[test]
    fn test_exit_code_for_other_errors() {
        let missing = anyhow::Error::new(ProcessorError::ToolMissing {
            binary: PathBuf::from("/usr/bin/nfdump"),
        });
        assert_eq!(exit_code_for(&missing), 1);
        assert_eq!(exit_code_for(&anyhow::anyhow!("boom")), 1);
    }
}
