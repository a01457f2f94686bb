use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use scriptward_commons::resolve_real_path;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{env, layout};
use crate::limits::Limits;
use crate::roots::AllowedRoots;

/// Contents of the optional `scriptward.toml`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FileConfig {
    pub limits: Limits,
    pub python: PythonConfig,
    pub memory: MemoryConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PythonConfig {
    /// Interpreter name or path, looked up on `PATH` when not absolute.
    #[serde(default = "PythonConfig::default_interpreter")]
    pub interpreter: String,
}

impl Default for PythonConfig {
    fn default() -> Self {
        Self {
            interpreter: Self::default_interpreter(),
        }
    }
}

impl PythonConfig {
    fn default_interpreter() -> String {
        "python3".to_owned()
    }
}

/// Which recall strategy backs the memory store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecallIndexKind {
    /// Shared-word overlap.
    #[default]
    Keyword,
    /// Hashed bag-of-words vectors compared by cosine similarity.
    Hashed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub index: RecallIndexKind,
}

/// Directories and files derived from the installation base directory.
///
/// Every directory exists and is symlink-resolved once [`Layout::prepare`]
/// returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub base_dir: PathBuf,
    pub data_dir: PathBuf,
    /// Root of the shared-file store.
    pub shared_dir: PathBuf,
    /// Working directory of sandboxed runs.
    pub scratch_dir: PathBuf,
    pub web_cache_file: PathBuf,
    pub memory_file: PathBuf,
}

impl Layout {
    pub fn prepare(base_dir: &Path) -> Result<Self> {
        let base_dir = resolve_dir(base_dir)?;
        let data_dir = ensure_dir(&base_dir.join(layout::DATA_DIR))?;
        let shared_dir = ensure_dir(&data_dir.join(layout::SHARED_DIR))?;
        let scratch_dir = ensure_dir(&data_dir.join(layout::SCRATCH_DIR))?;

        Ok(Self {
            web_cache_file: data_dir.join(layout::WEB_CACHE_FILE),
            memory_file: data_dir.join(layout::MEMORY_FILE),
            base_dir,
            data_dir,
            shared_dir,
            scratch_dir,
        })
    }
}

/// Everything the sandbox needs, resolved once at process start.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub layout: Layout,
    pub allowed_roots: AllowedRoots,
    pub limits: Limits,
    pub python: PythonConfig,
    pub memory: MemoryConfig,
}

impl SandboxConfig {
    /// Load from the process environment.
    ///
    /// The base directory is `home_override` when given, else
    /// `SCRIPTWARD_HOME`, else the current directory. Extra allowed roots
    /// come from `SCRIPTWARD_ALLOWED_DIRS`.
    pub fn load(home_override: Option<&Path>) -> Result<Self> {
        let base_dir = match home_override {
            Some(path) => path.to_path_buf(),
            None => Self::base_dir_from_env()?,
        };
        let extra_dirs: Option<OsString> = std::env::var_os(env::ALLOWED_DIRS_ENV_VAR);
        Self::load_from_base(&base_dir, extra_dirs.as_deref())
            .with_context(|| format!("Failed to load configuration for {}", base_dir.display()))
    }

    fn base_dir_from_env() -> Result<PathBuf> {
        if let Ok(home) = std::env::var(env::HOME_ENV_VAR) {
            let trimmed = home.trim();
            if !trimmed.is_empty() {
                return Ok(PathBuf::from(trimmed));
            }
        }
        std::env::current_dir().context("Failed to determine the current directory")
    }

    /// Load for an explicit base directory and extra-roots string.
    pub fn load_from_base(base_dir: &Path, extra_dirs: Option<&OsStr>) -> Result<Self> {
        let layout = Layout::prepare(base_dir)?;
        let file_config = Self::read_file_config(&layout.base_dir.join(layout::CONFIG_FILE_NAME))?;
        file_config
            .limits
            .validate()
            .context("Invalid [limits] section")?;

        let allowed_roots = AllowedRoots::from_base(&layout.base_dir, extra_dirs);
        debug!(
            base = %layout.base_dir.display(),
            roots = allowed_roots.len(),
            "loaded sandbox configuration"
        );

        Ok(Self {
            layout,
            allowed_roots,
            limits: file_config.limits,
            python: file_config.python,
            memory: file_config.memory,
        })
    }

    fn read_file_config(path: &Path) -> Result<FileConfig> {
        if !path.exists() {
            return Ok(FileConfig::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

fn resolve_dir(path: &Path) -> Result<PathBuf> {
    let resolved = resolve_real_path(path)
        .with_context(|| format!("Failed to resolve directory {}", path.display()))?;
    anyhow::ensure!(
        resolved.is_dir(),
        "Base directory {} does not exist",
        resolved.display()
    );
    Ok(resolved)
}

fn ensure_dir(path: &Path) -> Result<PathBuf> {
    fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory {}", path.display()))?;
    resolve_real_path(path).with_context(|| format!("Failed to resolve directory {}", path.display()))
}
