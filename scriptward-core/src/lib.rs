//! Containment core for untrusted Python snippets.
//!
//! The guards decide which paths and URLs a request may touch, the scanner
//! decides whether a script may run at all, and the executor runs accepted
//! scripts in an isolated child. [`Sandbox`] bundles the startup state they
//! share so callers hold one cheap, cloneable handle.

pub mod error;
pub mod executor;
pub mod fetch;
pub mod files;
pub mod guards;
pub mod memory;
pub mod scanner;

use std::path::PathBuf;
use std::sync::Arc;

use scriptward_config::{PolicySet, SandboxConfig};
use scriptward_runner::{IsolatedLauncher, ProcessLauncher};
use url::Url;

pub use error::{
    ExecutionError, FetchError, MemoryError, PathError, SandboxError, ScanViolation,
    SharedFileError, TimeBudget, UrlError,
};
pub use executor::{ExecutionResult, Executor};
pub use fetch::{FetchedPage, Fetcher};
pub use files::read_allowed_file;
pub use guards::{SharedEntry, SharedStore, check_path, check_url, resolve_shared_path};
pub use memory::{
    HashedIndex, KeywordIndex, MemoryRecord, MemoryStore, RecallIndex, RecordMeta, RecordOrigin,
    ScoredRecord, index_for,
};
pub use scanner::{ScanVerdict, scan, verdict};

/// Shared handle over configuration, policy, launcher and memory store.
#[derive(Clone)]
pub struct Sandbox {
    config: Arc<SandboxConfig>,
    policy: Arc<PolicySet>,
    launcher: Arc<dyn ProcessLauncher>,
    memory: Arc<MemoryStore>,
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("base_dir", &self.config.layout.base_dir)
            .field("roots", &self.config.allowed_roots.len())
            .field("memory", &self.memory)
            .finish_non_exhaustive()
    }
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self::with_launcher(
            config,
            PolicySet::default(),
            Arc::new(IsolatedLauncher::new()),
        )
    }

    pub fn with_launcher(
        config: SandboxConfig,
        policy: PolicySet,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Self {
        let memory = MemoryStore::new(
            config.layout.memory_file.clone(),
            index_for(config.memory.index),
        );
        Self {
            config: Arc::new(config),
            policy: Arc::new(policy),
            launcher,
            memory: Arc::new(memory),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn policy(&self) -> &PolicySet {
        &self.policy
    }

    pub fn check_path(&self, candidate: &str) -> Result<PathBuf, PathError> {
        check_path(candidate, self.config.allowed_roots.as_slice())
    }

    pub fn read_allowed_file(&self, candidate: &str) -> Result<String, SandboxError> {
        read_allowed_file(
            candidate,
            self.config.allowed_roots.as_slice(),
            self.config.limits.max_file_chars,
        )
    }

    pub fn check_url(&self, raw: &str) -> Result<Url, UrlError> {
        check_url(raw, &self.policy)
    }

    pub fn scan(&self, source: &str) -> ScanVerdict {
        verdict(source, &self.policy)
    }

    pub async fn execute(&self, source: &str) -> Result<ExecutionResult, ExecutionError> {
        Executor::new(&self.config, &self.policy, self.launcher.as_ref())
            .execute(source)
            .await
    }

    pub fn shared(&self) -> SharedStore<'_> {
        SharedStore::new(
            &self.config.layout.shared_dir,
            &self.policy,
            self.config.limits.max_shared_chars,
            self.config.limits.max_file_chars,
        )
    }

    pub fn resolve_shared_path(&self, filename: &str) -> Result<PathBuf, PathError> {
        resolve_shared_path(&self.config.layout.shared_dir, filename)
    }

    pub async fn fetch(&self, raw_url: &str) -> Result<FetchedPage, FetchError> {
        Fetcher::new(
            Arc::clone(&self.policy),
            &self.config.layout.web_cache_file,
            self.config.limits.max_web_chars,
            self.config.limits.fetch_timeout(),
        )
        .fetch(raw_url)
        .await
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::TempDir;
    use assert_fs::prelude::*;
    use pretty_assertions::assert_eq;

    fn sandbox(temp: &TempDir) -> anyhow::Result<Sandbox> {
        Ok(Sandbox::new(SandboxConfig::load_from_base(temp.path(), None)?))
    }

    #[test]
    fn facade_routes_to_the_configured_roots() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        temp.child("notes.txt").write_str("hello")?;
        let sandbox = sandbox(&temp)?;
        let base = sandbox.config().layout.base_dir.clone();

        assert_eq!(
            sandbox.check_path(&base.join("notes.txt").display().to_string())?,
            base.join("notes.txt")
        );
        assert_eq!(
            sandbox.read_allowed_file(&base.join("notes.txt").display().to_string())?,
            "hello"
        );
        assert!(matches!(
            sandbox.resolve_shared_path("../escape.txt"),
            Err(PathError::TraversalAttempt(_))
        ));
        Ok(())
    }

    #[test]
    fn shared_store_lives_under_the_data_dir() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let sandbox = sandbox(&temp)?;

        let written = sandbox.shared().write("reports/q1.md", "# Q1")?;
        assert!(written.starts_with(&sandbox.config().layout.shared_dir));
        assert_eq!(sandbox.shared().read("reports/q1.md")?, "# Q1");
        Ok(())
    }

    #[test]
    fn scan_and_url_checks_use_the_policy() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let sandbox = sandbox(&temp)?;

        assert!(sandbox.scan("print(1 + 1)").allowed);
        assert!(!sandbox.scan("import os").allowed);
        assert!(sandbox.check_url("https://example.com/a").is_ok());
        assert!(sandbox.check_url("http://localhost:8080").is_err());
        Ok(())
    }

    #[tokio::test]
    async fn rejected_scripts_never_reach_the_launcher() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let sandbox = sandbox(&temp)?;

        assert!(matches!(
            sandbox.execute("import subprocess").await,
            Err(ExecutionError::Rejected(_))
        ));
        Ok(())
    }

    #[test]
    fn clones_share_the_memory_store() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let sandbox = sandbox(&temp)?;
        let clone = sandbox.clone();

        sandbox
            .memory()
            .remember("shared note", "", RecordOrigin::local())?;
        assert_eq!(clone.memory().recall("note", 3, None).len(), 1);
        Ok(())
    }
}
