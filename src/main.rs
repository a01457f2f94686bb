//! scriptward - containment layer for untrusted Python snippets
//!
//! Thin binary entry point that delegates to the CLI handlers.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use scriptward_config::SandboxConfig;
use scriptward_core::{Sandbox, SandboxError};

mod cli;
mod main_helpers;
mod process_hardening;

use cli::Cli;

/// Policy rejections, as opposed to environmental failures.
const REJECTED_EXIT_CODE: u8 = 2;
const FAILURE_EXIT_CODE: u8 = 1;

fn main() -> ExitCode {
    // Runs before the runtime starts any thread.
    if let Err(error) = process_hardening::apply_process_hardening() {
        eprintln!("error: {error:#}");
        return ExitCode::from(FAILURE_EXIT_CODE);
    }

    let args = Cli::parse();
    if let Err(error) = main_helpers::initialize_tracing(&args.log_level) {
        eprintln!("warning: {error:#}");
    }

    match run(args) {
        Ok(code) => code,
        Err(error) => report(&error),
    }
}

fn run(args: Cli) -> Result<ExitCode> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;

    runtime.block_on(async move {
        let config = SandboxConfig::load(args.home.as_deref())?;
        let sandbox = Sandbox::new(config);
        cli::dispatch(&sandbox, args.command).await
    })
}

fn report(error: &anyhow::Error) -> ExitCode {
    let rejection = error
        .chain()
        .find_map(|cause| cause.downcast_ref::<SandboxError>())
        .filter(|sandbox_error| sandbox_error.is_rejection());

    match rejection {
        Some(rejection) => {
            tracing::debug!(%rejection, "request rejected");
            eprintln!("rejected: {rejection}");
            ExitCode::from(REJECTED_EXIT_CODE)
        }
        None => {
            eprintln!("error: {error:#}");
            ExitCode::from(FAILURE_EXIT_CODE)
        }
    }
}
