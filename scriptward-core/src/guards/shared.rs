//! The shared-file store: one directory of text artifacts that callers may
//! read, write and list by relative name.

use std::fmt;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use scriptward_commons::{
    expand_home, is_within, lexical_normalize, normalize_separators, resolve_real_path,
};
use scriptward_config::PolicySet;
use scriptward_config::constants::limits::{
    BINARY_SNIFF_BYTES, SHARED_LIST_DEFAULT, SHARED_LIST_MAX,
};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::path::display_relative;
use crate::error::{PathError, SharedFileError};
use crate::files::read_truncated;

/// Leading bytes of native executables (ELF, PE, Mach-O thin and fat).
const EXECUTABLE_MAGIC: &[&[u8]] = &[
    b"\x7fELF",
    b"MZ",
    b"\xfe\xed\xfa\xce",
    b"\xfe\xed\xfa\xcf",
    b"\xce\xfa\xed\xfe",
    b"\xcf\xfa\xed\xfe",
    b"\xca\xfe\xba\xbe",
];

/// Map `filename` to a path strictly beneath `shared_root`.
///
/// The name is normalized as text first, so `..` escapes are refused before
/// the filesystem is touched. The joined path is then resolved and checked
/// again, which catches symlinks inside the store that point outward.
/// `shared_root` must already be resolved.
pub fn resolve_shared_path(shared_root: &Path, filename: &str) -> Result<PathBuf, PathError> {
    if filename.trim().is_empty() {
        return Err(PathError::EmptyName);
    }
    if looks_absolute(&normalize_separators(filename)) {
        return Err(PathError::AbsoluteNotAllowed(filename.to_owned()));
    }

    let expanded = normalize_separators(&expand_home(filename).to_string_lossy());
    if looks_absolute(&expanded) {
        return Err(PathError::AbsoluteNotAllowed(filename.to_owned()));
    }

    let normalized = lexical_normalize(Path::new(&expanded));
    match normalized.components().next() {
        None => return Err(PathError::EmptyName),
        Some(Component::ParentDir) => {
            debug!(filename, "shared path rejected: traversal");
            return Err(PathError::TraversalAttempt(filename.to_owned()));
        }
        Some(_) => {}
    }

    let joined = shared_root.join(&normalized);
    let resolved = resolve_real_path(&joined).map_err(|error| {
        debug!(path = %joined.display(), %error, "shared path could not be resolved");
        PathError::OutsideSandbox(joined.clone())
    })?;

    if resolved == shared_root || !is_within(&resolved, shared_root) {
        debug!(path = %resolved.display(), "shared path rejected: escapes the store");
        return Err(PathError::OutsideSandbox(resolved));
    }
    Ok(resolved)
}

fn looks_absolute(text: &str) -> bool {
    if text.starts_with('/') || Path::new(text).is_absolute() {
        return true;
    }
    let mut chars = text.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some(drive), Some(':')) if drive.is_ascii_alphabetic()
    )
}

/// One file in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedEntry {
    /// Path relative to the store root, `/`-separated.
    pub relative: String,
    pub path: PathBuf,
}

impl fmt::Display for SharedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.relative, self.path.display())
    }
}

/// Guarded access to the shared directory.
#[derive(Debug, Clone, Copy)]
pub struct SharedStore<'a> {
    root: &'a Path,
    policy: &'a PolicySet,
    max_write_chars: usize,
    max_read_chars: usize,
}

impl<'a> SharedStore<'a> {
    pub fn new(
        root: &'a Path,
        policy: &'a PolicySet,
        max_write_chars: usize,
        max_read_chars: usize,
    ) -> Self {
        Self {
            root,
            policy,
            max_write_chars,
            max_read_chars,
        }
    }

    pub fn root(&self) -> &Path {
        self.root
    }

    /// Write `content` to `filename`, creating parent directories.
    ///
    /// Size and content checks run before any filesystem access.
    pub fn write(&self, filename: &str, content: &str) -> Result<PathBuf, SharedFileError> {
        let actual = content.chars().count();
        if actual > self.max_write_chars {
            return Err(SharedFileError::ContentTooLong {
                actual,
                limit: self.max_write_chars,
            });
        }
        if let Some(marker) = self.policy.shared_content_marker_in(content) {
            debug!(marker, "shared write rejected: forbidden marker in content");
            return Err(SharedFileError::ForbiddenContent(marker.to_owned()));
        }

        let path = resolve_shared_path(self.root, filename)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| SharedFileError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&path, content).map_err(|source| SharedFileError::Io {
            path: path.clone(),
            source,
        })?;

        info!(path = %path.display(), chars = actual, "wrote shared file");
        Ok(path)
    }

    /// Read `filename` as text, truncated to the read limit.
    ///
    /// Files that start with a native executable header are refused.
    pub fn read(&self, filename: &str) -> Result<String, SharedFileError> {
        let path = resolve_shared_path(self.root, filename)?;
        if !path.is_file() {
            return Err(PathError::NotFound(path).into());
        }

        let io_error = |source| SharedFileError::Io {
            path: path.clone(),
            source,
        };
        let mut file = File::open(&path).map_err(io_error)?;

        let mut head = Vec::with_capacity(BINARY_SNIFF_BYTES);
        (&mut file)
            .take(BINARY_SNIFF_BYTES as u64)
            .read_to_end(&mut head)
            .map_err(io_error)?;
        if is_native_executable(&head) {
            debug!(path = %path.display(), "shared read rejected: executable binary");
            return Err(SharedFileError::BinaryFile(path.clone()));
        }

        read_truncated(file, head, self.max_read_chars).map_err(io_error)
    }

    /// Files in the store, sorted by name, at most `limit` entries.
    ///
    /// `limit` is clamped to `1..=500` and defaults to 200. Symlinks are
    /// listed but never followed.
    pub fn list(&self, limit: Option<usize>) -> Vec<SharedEntry> {
        let limit = limit
            .unwrap_or(SHARED_LIST_DEFAULT)
            .clamp(1, SHARED_LIST_MAX);

        WalkDir::new(self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(error) => {
                    debug!(%error, "skipping unreadable shared entry");
                    None
                }
            })
            .filter(|entry| !entry.file_type().is_dir())
            .take(limit)
            .map(|entry| SharedEntry {
                relative: display_relative(entry.path(), self.root),
                path: entry.into_path(),
            })
            .collect()
    }
}

fn is_native_executable(head: &[u8]) -> bool {
    EXECUTABLE_MAGIC.iter().any(|magic| head.starts_with(magic))
}
