use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use scriptward_core::{Sandbox, SandboxError};
use tracing::info;

use crate::main_helpers::read_input;

pub(crate) async fn handle_run(sandbox: &Sandbox, file: Option<&Path>, json: bool) -> Result<ExitCode> {
    let source = read_input(file)?;
    let result = sandbox
        .execute(&source)
        .await
        .map_err(SandboxError::from)?;
    info!(exit_code = ?result.exit_code, truncated = result.truncated, "run finished");

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if result.output.ends_with('\n') || result.output.is_empty() {
        print!("{}", result.output);
    } else {
        println!("{}", result.output);
    }

    Ok(if result.success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

pub(crate) fn handle_scan(sandbox: &Sandbox, file: Option<&Path>, json: bool) -> Result<ExitCode> {
    let source = read_input(file)?;
    let verdict = sandbox.scan(&source);

    if json {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
    } else if let Some(reason) = verdict.reason.as_deref() {
        println!("rejected: {reason}");
    } else {
        println!("allowed");
    }

    Ok(if verdict.allowed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(crate::REJECTED_EXIT_CODE)
    })
}
