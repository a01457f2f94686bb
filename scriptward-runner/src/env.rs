//! Environment rebuilt from scratch for sandboxed children.
//!
//! The child starts from an empty environment; only the variables below are
//! copied over, then the home and temp variables are pointed at the scratch
//! directory.

use std::collections::HashMap;
use std::path::Path;

/// Copied from the parent when present.
pub const PRESERVED_ENV_VARS: &[&str] = &["PATH", "LANG", "LC_ALL", "LC_CTYPE", "TZ", "SYSTEMROOT"];

/// Set to `1` in every sandboxed child.
pub const SANDBOX_ACTIVE_ENV_VAR: &str = "SCRIPTWARD_SANDBOX_ACTIVE";

/// Home and temp variables, all redirected to the scratch directory.
const SCRATCH_ENV_VARS: &[&str] = &["HOME", "TMPDIR", "TMP", "TEMP"];

/// Build the child environment from `current`.
///
/// Credentials, linker overrides and anything else not listed in
/// [`PRESERVED_ENV_VARS`] are left behind.
pub fn build_sanitized_env(
    current: &HashMap<String, String>,
    scratch_dir: &Path,
) -> HashMap<String, String> {
    let mut sanitized: HashMap<String, String> = PRESERVED_ENV_VARS
        .iter()
        .filter_map(|key| {
            current
                .get(*key)
                .map(|value| ((*key).to_owned(), value.clone()))
        })
        .collect();

    let scratch = scratch_dir.display().to_string();
    for key in SCRATCH_ENV_VARS {
        sanitized.insert((*key).to_owned(), scratch.clone());
    }
    sanitized.insert(SANDBOX_ACTIVE_ENV_VAR.to_owned(), "1".to_owned());

    sanitized
}

/// Snapshot of the current process environment, skipping non UTF-8 entries.
pub fn current_env() -> HashMap<String, String> {
    std::env::vars().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn keeps_only_preserved_variables() {
        let current: HashMap<String, String> = [
            ("PATH", "/usr/bin"),
            ("LANG", "C.UTF-8"),
            ("OPENAI_API_KEY", "sk-secret"),
            ("LD_PRELOAD", "/tmp/evil.so"),
            ("HOME", "/home/user"),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .collect();

        let scratch = PathBuf::from("/srv/scriptward/data/scratch");
        let env = build_sanitized_env(&current, &scratch);

        assert_eq!(env.get("PATH").map(String::as_str), Some("/usr/bin"));
        assert_eq!(env.get("LANG").map(String::as_str), Some("C.UTF-8"));
        assert_eq!(
            env.get("HOME").map(String::as_str),
            Some("/srv/scriptward/data/scratch")
        );
        assert_eq!(env.get(SANDBOX_ACTIVE_ENV_VAR).map(String::as_str), Some("1"));
        assert!(!env.contains_key("OPENAI_API_KEY"));
        assert!(!env.contains_key("LD_PRELOAD"));
    }
}
