use std::process::ExitCode;

use anyhow::Result;
use scriptward_core::{Sandbox, SandboxError};

use super::SharedCommands;
use crate::main_helpers::read_input;

pub(crate) fn handle_read(sandbox: &Sandbox, path: &str) -> Result<ExitCode> {
    let text = sandbox.read_allowed_file(path)?;
    print!("{text}");
    Ok(ExitCode::SUCCESS)
}

pub(crate) fn handle_shared(sandbox: &Sandbox, command: SharedCommands) -> Result<ExitCode> {
    let store = sandbox.shared();
    match command {
        SharedCommands::Write { name, content } => {
            let content = match content {
                Some(content) => content,
                None => read_input(None)?,
            };
            let path = store
                .write(&name, &content)
                .map_err(SandboxError::from)?;
            println!("wrote {} chars to {}", content.chars().count(), path.display());
        }
        SharedCommands::Read { name } => {
            let text = store.read(&name).map_err(SandboxError::from)?;
            print!("{text}");
        }
        SharedCommands::List { limit } => {
            let entries = store.list(limit.map(|limit| limit.get()));
            if entries.is_empty() {
                println!("(no shared files)");
            }
            for entry in entries {
                println!("{entry}");
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

pub(crate) fn handle_roots(sandbox: &Sandbox) -> Result<ExitCode> {
    let config = sandbox.config();
    println!("allowed roots:");
    for root in config.allowed_roots.iter() {
        println!("  {}", root.display());
    }
    println!("shared root:");
    println!("  {}", config.layout.shared_dir.display());
    Ok(ExitCode::SUCCESS)
}
