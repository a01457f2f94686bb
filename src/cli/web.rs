use std::process::ExitCode;

use anyhow::Result;
use scriptward_core::{Sandbox, SandboxError};

pub(crate) fn handle_check_url(sandbox: &Sandbox, url: &str) -> Result<ExitCode> {
    let url = sandbox.check_url(url).map_err(SandboxError::from)?;
    println!("allowed: {url}");
    Ok(ExitCode::SUCCESS)
}

pub(crate) async fn handle_fetch(sandbox: &Sandbox, url: &str) -> Result<ExitCode> {
    let page = sandbox.fetch(url).await.map_err(SandboxError::from)?;
    if !page.title.is_empty() {
        println!("title: {}", page.title);
    }
    println!("{page}");
    Ok(ExitCode::SUCCESS)
}
