//! Command-line surface and request dispatch.

use std::num::NonZero;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use scriptward_core::Sandbox;

mod memory;
mod script;
mod storage;
mod web;

#[derive(Debug, Parser)]
#[command(name = "scriptward")]
#[command(about = "Run untrusted Python snippets and guarded file or URL requests")]
#[command(version)]
pub struct Cli {
    /// Installation base directory (defaults to SCRIPTWARD_HOME, then the current directory)
    #[arg(long, global = true, value_name = "DIR")]
    pub home: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn", value_name = "LEVEL")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan and run a Python script (reads stdin when FILE is omitted)
    Run {
        file: Option<PathBuf>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Scan a Python script without running it
    Scan {
        file: Option<PathBuf>,

        /// Print the verdict as JSON
        #[arg(long)]
        json: bool,
    },

    /// Read a text file inside the allowed roots
    Read { path: String },

    /// Shared-file store operations
    Shared {
        #[command(subcommand)]
        command: SharedCommands,
    },

    /// Validate a URL without fetching it
    CheckUrl { url: String },

    /// Fetch a page and cache its text
    Fetch { url: String },

    /// Persisted notes
    Memory {
        #[command(subcommand)]
        command: MemoryCommands,
    },

    /// Print the allowed roots and the shared root
    Roots,
}

#[derive(Debug, Subcommand)]
pub enum SharedCommands {
    /// Write a file (content from --content or stdin)
    Write {
        name: String,

        #[arg(long)]
        content: Option<String>,
    },

    /// Read a file
    Read { name: String },

    /// List files
    List {
        #[arg(long)]
        limit: Option<NonZero<usize>>,
    },
}

#[derive(Debug, Subcommand)]
pub enum MemoryCommands {
    /// Store a note
    Remember {
        text: String,

        #[arg(long, default_value = "general")]
        category: String,

        /// Who wrote the note (user, assistant, ...)
        #[arg(long)]
        role: Option<String>,

        /// Where the note came from
        #[arg(long, default_value = "local")]
        source: String,

        /// Conversation the note belongs to
        #[arg(long)]
        conversation: Option<String>,
    },

    /// Find notes related to a query
    Recall {
        query: String,

        #[arg(long, default_value = "5")]
        limit: NonZero<usize>,

        /// Only search notes from this conversation
        #[arg(long)]
        conversation: Option<String>,
    },
}

pub async fn dispatch(sandbox: &Sandbox, command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Run { file, json } => script::handle_run(sandbox, file.as_deref(), json).await,
        Commands::Scan { file, json } => script::handle_scan(sandbox, file.as_deref(), json),
        Commands::Read { path } => storage::handle_read(sandbox, &path),
        Commands::Shared { command } => storage::handle_shared(sandbox, command),
        Commands::CheckUrl { url } => web::handle_check_url(sandbox, &url),
        Commands::Fetch { url } => web::handle_fetch(sandbox, &url).await,
        Commands::Memory { command } => memory::handle_memory(sandbox, command),
        Commands::Roots => storage::handle_roots(sandbox),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn nested_commands_parse() -> Result<()> {
        let cli = Cli::try_parse_from([
            "scriptward",
            "--home",
            "/srv/sw",
            "shared",
            "list",
            "--limit",
            "3",
        ])?;
        assert_eq!(cli.home, Some(PathBuf::from("/srv/sw")));
        assert!(matches!(
            cli.command,
            Commands::Shared {
                command: SharedCommands::List { limit: Some(limit) }
            } if limit.get() == 3
        ));
        Ok(())
    }

    #[test]
    fn memory_origin_flags_parse() -> Result<()> {
        let cli = Cli::try_parse_from([
            "scriptward",
            "memory",
            "remember",
            "note",
            "--role",
            "user",
            "--conversation",
            "c1",
        ])?;
        assert!(matches!(
            cli.command,
            Commands::Memory {
                command: MemoryCommands::Remember { role: Some(role), source, conversation: Some(conversation), .. }
            } if role == "user" && source == "local" && conversation == "c1"
        ));
        Ok(())
    }

    #[test]
    fn zero_limits_are_refused() {
        assert!(Cli::try_parse_from(["scriptward", "memory", "recall", "x", "--limit", "0"]).is_err());
    }
}
