use std::io;
use std::path::{Component, Path, PathBuf};

/// Upper bound on symlink hops followed while resolving one path.
const MAX_SYMLINK_HOPS: usize = 40;

/// Expand a leading `~` into the current user's home directory.
///
/// Only the bare `~` and `~/...` (or `~\...`) forms are expanded; `~user`
/// shorthand and inputs without a home directory are returned unchanged.
pub fn expand_home(input: &str) -> PathBuf {
    if input == "~"
        && let Some(home) = dirs::home_dir()
    {
        return home;
    }

    if let Some(rest) = input.strip_prefix("~/").or_else(|| input.strip_prefix("~\\"))
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }

    PathBuf::from(input)
}

/// Rewrite Windows-style separators to `/` so mixed inputs normalize the same way.
pub fn normalize_separators(input: &str) -> String {
    input.replace('\\', "/")
}

/// Collapse `.` and `..` components without touching the filesystem.
///
/// Unlike a plain pop-based normalization, leading `..` segments of a relative
/// path are preserved (`../../a` stays `../../a`), so callers can tell that
/// the path escapes its base. `..` directly under a root is dropped.
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                Some(Component::ParentDir | Component::CurDir) | None => parts.push(component),
            },
            other => parts.push(other),
        }
    }
    parts.iter().map(|component| component.as_os_str()).collect()
}

/// Resolve `path` to an absolute path with every symlink along the way followed.
///
/// Existing components are resolved one at a time, so a `..` that follows a
/// symlink walks up from the link target rather than from the link itself.
/// Components that do not exist yet are appended lexically, which lets a
/// caller validate the destination of a file that is about to be created.
/// Dangling symlinks are followed to their (missing) target.
pub fn resolve_real_path(path: &Path) -> io::Result<PathBuf> {
    let mut hops = MAX_SYMLINK_HOPS;
    resolve_with_budget(path, &mut hops)
}

fn resolve_with_budget(path: &Path, hops: &mut usize) -> io::Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut resolved = PathBuf::new();

    for component in absolute.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => resolved.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(name) => {
                let candidate = resolved.join(name);
                match std::fs::symlink_metadata(&candidate) {
                    Ok(metadata) if metadata.file_type().is_symlink() => {
                        if *hops == 0 {
                            return Err(io::Error::other(format!(
                                "too many levels of symbolic links at {}",
                                candidate.display()
                            )));
                        }
                        *hops -= 1;
                        // An absolute link target replaces `resolved` entirely.
                        let target = resolved.join(std::fs::read_link(&candidate)?);
                        resolved = resolve_with_budget(&target, hops)?;
                    }
                    Ok(_) => resolved = candidate,
                    Err(err)
                        if matches!(
                            err.kind(),
                            io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
                        ) =>
                    {
                        resolved = candidate;
                    }
                    Err(err) => return Err(err),
                }
            }
        }
    }

    Ok(resolved)
}

/// Longest leading path shared by `a` and `b`, compared component by component.
///
/// Returns `None` when the two paths cannot be compared at all: one is
/// absolute and the other relative, or they sit under different prefixes
/// (drive letters, UNC shares).
pub fn common_prefix(a: &Path, b: &Path) -> Option<PathBuf> {
    if a.is_absolute() != b.is_absolute() {
        return None;
    }

    let mut shared = PathBuf::new();
    for (index, (left, right)) in a.components().zip(b.components()).enumerate() {
        if left != right {
            let prefix_mismatch = matches!(left, Component::Prefix(_))
                || matches!(right, Component::Prefix(_));
            if index == 0 && prefix_mismatch {
                return None;
            }
            break;
        }
        shared.push(left.as_os_str());
    }
    Some(shared)
}

/// True when `candidate` equals `root` or lies beneath it.
///
/// Both paths are expected to be resolved already; this is a pure
/// component comparison, so `/srv/data2` is not inside `/srv/data`.
pub fn is_within(candidate: &Path, root: &Path) -> bool {
    common_prefix(root, candidate).is_some_and(|prefix| prefix.as_path() == root)
}
