use std::process::ExitCode;

use anyhow::Result;
use scriptward_core::{RecordOrigin, Sandbox, SandboxError};

use super::MemoryCommands;

pub(crate) fn handle_memory(sandbox: &Sandbox, command: MemoryCommands) -> Result<ExitCode> {
    let store = sandbox.memory();
    match command {
        MemoryCommands::Remember {
            text,
            category,
            role,
            source,
            conversation,
        } => {
            let mut origin = RecordOrigin::local().source(source);
            if let Some(role) = role {
                origin = origin.role(role);
            }
            if let Some(conversation) = conversation {
                origin = origin.conversation(conversation);
            }
            let record = store
                .remember(&text, &category, origin)
                .map_err(SandboxError::from)?;
            println!("remembered {} [{}] {}", record.id, record.category, record.meta);
        }
        MemoryCommands::Recall {
            query,
            limit,
            conversation,
        } => {
            let hits = store.recall(&query, limit.get(), conversation.as_deref());
            if hits.is_empty() {
                println!("(no matching memories)");
            }
            for hit in hits {
                println!("{:.3} {}", hit.score, hit.record);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
