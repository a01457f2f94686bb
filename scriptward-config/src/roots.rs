use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use scriptward_commons::resolve_real_path;
use tracing::debug;

/// Directories a caller may read from, in priority order.
///
/// Every entry is absolute and symlink-resolved. Built once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowedRoots {
    roots: Vec<PathBuf>,
}

impl AllowedRoots {
    /// Build the root list from the installation base directory plus an
    /// optional separator-delimited list of extra directories.
    ///
    /// Blank entries and entries that do not resolve to an existing directory
    /// are skipped without failing.
    pub fn from_base(base_dir: &Path, extra_dirs: Option<&OsStr>) -> Self {
        let mut roots = Self::default();
        roots.push_candidate(base_dir);

        if let Some(extra) = extra_dirs {
            for entry in std::env::split_paths(extra) {
                let Some(trimmed) = entry.to_str().map(str::trim) else {
                    debug!(entry = %entry.display(), "skipping non UTF-8 allowed root");
                    continue;
                };
                if trimmed.is_empty() {
                    continue;
                }
                roots.push_candidate(Path::new(trimmed));
            }
        }

        roots
    }

    /// Wrap directories that are already resolved.
    pub fn from_resolved(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            roots: roots.into_iter().collect(),
        }
    }

    fn push_candidate(&mut self, candidate: &Path) {
        match resolve_real_path(candidate) {
            Ok(resolved) if resolved.is_dir() => {
                if !self.roots.contains(&resolved) {
                    self.roots.push(resolved);
                }
            }
            Ok(resolved) => {
                debug!(root = %resolved.display(), "skipping allowed root that is not a directory");
            }
            Err(error) => {
                debug!(root = %candidate.display(), %error, "skipping unresolvable allowed root");
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.roots.iter().map(PathBuf::as_path)
    }

    pub fn as_slice(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}
