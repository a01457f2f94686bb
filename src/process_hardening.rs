use anyhow::{Context, Result};

/// Apply process hardening safeguards to the current process.
///
/// Must run before any thread is spawned: it edits the process environment.
pub fn apply_process_hardening() -> Result<()> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        harden_linux().context("failed to apply Linux process hardening")?;
    }

    #[cfg(target_os = "macos")]
    {
        harden_macos().context("failed to apply macOS process hardening")?;
    }

    Ok(())
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn harden_linux() -> Result<()> {
    // Disable ptrace attach / mark process non-dumpable.
    let ret_code = unsafe { libc::prctl(libc::PR_SET_DUMPABLE, 0, 0, 0, 0) };
    if ret_code != 0 {
        return Err(std::io::Error::last_os_error()).context("prctl(PR_SET_DUMPABLE, 0) failed");
    }

    set_core_file_size_limit_to_zero()?;
    remove_env_vars_with_prefix(&["LD_", "DYLD_"]);
    Ok(())
}

#[cfg(target_os = "macos")]
fn harden_macos() -> Result<()> {
    set_core_file_size_limit_to_zero()?;
    remove_env_vars_with_prefix(&["DYLD_", "LD_"]);
    Ok(())
}

#[cfg(unix)]
fn set_core_file_size_limit_to_zero() -> Result<()> {
    let rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };

    let ret_code = unsafe { libc::setrlimit(libc::RLIMIT_CORE, &rlim) };
    if ret_code != 0 {
        return Err(std::io::Error::last_os_error()).context("setrlimit(RLIMIT_CORE) failed");
    }
    Ok(())
}

#[cfg(unix)]
fn remove_env_vars_with_prefix(prefixes: &[&str]) {
    let keys: Vec<std::ffi::OsString> = std::env::vars_os()
        .map(|(key, _)| key)
        .filter(|key| {
            key.to_str()
                .is_some_and(|key| prefixes.iter().any(|prefix| key.starts_with(prefix)))
        })
        .collect();

    for key in keys {
        tracing::debug!(key = ?key, "removing loader variable from environment");
        unsafe {
            std::env::remove_var(key);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn loader_variables_are_removed() {
        unsafe {
            std::env::set_var("LD_SCRIPTWARD_PROBE", "1");
            std::env::set_var("SCRIPTWARD_PROBE_KEEP", "1");
        }
        remove_env_vars_with_prefix(&["LD_"]);

        assert!(std::env::var_os("LD_SCRIPTWARD_PROBE").is_none());
        assert!(std::env::var_os("SCRIPTWARD_PROBE_KEEP").is_some());
        unsafe {
            std::env::remove_var("SCRIPTWARD_PROBE_KEEP");
        }
    }
}
