use std::path::{Path, PathBuf};

use scriptward_commons::{expand_home, is_within, resolve_real_path};
use tracing::debug;

use crate::error::PathError;

/// Accept `candidate` only when its fully resolved form lies inside one of
/// `roots`, and return that resolved path.
///
/// Containment is decided on the symlink-resolved absolute path, never on
/// the raw string. Roots that cannot be compared with the candidate (a
/// different drive, say) simply do not match.
pub fn check_path(candidate: &str, roots: &[PathBuf]) -> Result<PathBuf, PathError> {
    if candidate.trim().is_empty() {
        return Err(PathError::EmptyName);
    }

    let expanded = expand_home(candidate);
    let resolved = resolve_real_path(&expanded).map_err(|error| {
        debug!(path = %expanded.display(), %error, "path could not be resolved");
        PathError::OutsideSandbox(expanded.clone())
    })?;

    if roots.iter().any(|root| is_within(&resolved, root)) {
        return Ok(resolved);
    }

    debug!(path = %resolved.display(), "path rejected: outside every allowed root");
    Err(PathError::OutsideSandbox(resolved))
}

/// Like [`check_path`] but also requires the target to be an existing file.
pub fn check_existing_file(candidate: &str, roots: &[PathBuf]) -> Result<PathBuf, PathError> {
    let resolved = check_path(candidate, roots)?;
    if resolved.is_file() {
        Ok(resolved)
    } else {
        Err(PathError::NotFound(resolved))
    }
}

pub(crate) fn display_relative(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn root_of(temp: &TempDir) -> anyhow::Result<PathBuf> {
        Ok(fs::canonicalize(temp.path())?)
    }

    #[test]
    fn accepts_paths_inside_a_root() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let root = root_of(&temp)?;
        fs::write(root.join("notes.txt"), "hi")?;

        let candidate = root.join("notes.txt");
        let resolved = check_path(&candidate.display().to_string(), &[root.clone()])?;
        assert_eq!(resolved, candidate);
        Ok(())
    }

    #[test]
    fn rejects_empty_input() {
        assert_eq!(check_path("", &[]), Err(PathError::EmptyName));
        assert_eq!(check_path("   ", &[]), Err(PathError::EmptyName));
    }

    #[test]
    fn parent_segments_cannot_escape() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let root = root_of(&temp)?;
        fs::create_dir(root.join("inner"))?;

        let sneaky = format!("{}/inner/../../etc/passwd", root.display());
        assert!(matches!(
            check_path(&sneaky, &[root.join("inner")]),
            Err(PathError::OutsideSandbox(_))
        ));
        Ok(())
    }

    #[test]
    fn sibling_with_shared_prefix_is_outside() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let base = root_of(&temp)?;
        fs::create_dir(base.join("data"))?;
        fs::create_dir(base.join("data2"))?;

        let candidate = base.join("data2").display().to_string();
        assert!(check_path(&candidate, &[base.join("data")]).is_err());
        Ok(())
    }

    #[test]
    fn any_matching_root_is_enough() -> anyhow::Result<()> {
        let first = TempDir::new()?;
        let second = TempDir::new()?;
        let second_root = root_of(&second)?;
        let candidate = second_root.join("later.txt").display().to_string();
        let roots = vec![root_of(&first)?, second_root];
        assert!(check_path(&candidate, &roots).is_ok());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn symlink_pointing_outside_is_rejected() -> anyhow::Result<()> {
        let inside = TempDir::new()?;
        let outside = TempDir::new()?;
        let root = root_of(&inside)?;
        let secret = root_of(&outside)?.join("secret.txt");
        fs::write(&secret, "classified")?;
        std::os::unix::fs::symlink(&secret, root.join("link.txt"))?;

        let candidate = root.join("link.txt").display().to_string();
        assert_eq!(
            check_path(&candidate, &[root]),
            Err(PathError::OutsideSandbox(secret))
        );
        Ok(())
    }

    #[test]
    fn missing_file_is_not_found() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let root = root_of(&temp)?;
        let candidate = root.join("absent.txt");
        assert_eq!(
            check_existing_file(&candidate.display().to_string(), &[root]),
            Err(PathError::NotFound(candidate))
        );
        Ok(())
    }

    #[test]
    fn relative_display_uses_forward_slashes() {
        let base = Path::new("/srv/shared");
        assert_eq!(
            display_relative(Path::new("/srv/shared/a/b.txt"), base),
            "a/b.txt"
        );
    }
}
