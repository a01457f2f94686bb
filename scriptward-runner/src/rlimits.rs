//! Resource limits applied inside the forked child before `exec`.
//!
//! Everything here runs in `pre_exec`, so it sticks to async-signal-safe
//! libc calls and never allocates.

use std::io;

/// Restrictions applied to a child before it runs any user code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChildLimits {
    /// CPU seconds before `SIGXCPU`; `SIGKILL` follows one second later.
    pub cpu_seconds: Option<u64>,
    /// Set `RLIMIT_CORE` to zero.
    pub disable_core_dumps: bool,
    /// Set `PR_SET_NO_NEW_PRIVS` so setuid binaries cannot raise privileges (Linux).
    pub no_new_privileges: bool,
}

impl ChildLimits {
    /// Every restriction this crate knows, with the given CPU budget.
    pub fn strict(cpu_seconds: Option<u64>) -> Self {
        Self {
            cpu_seconds,
            disable_core_dumps: true,
            no_new_privileges: true,
        }
    }
}

#[cfg(unix)]
pub(crate) fn apply(limits: ChildLimits) -> io::Result<()> {
    if limits.disable_core_dumps {
        let zero = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        check(unsafe { libc::setrlimit(libc::RLIMIT_CORE, &zero) })?;
    }

    if let Some(seconds) = limits.cpu_seconds {
        let mut current = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        check(unsafe { libc::getrlimit(libc::RLIMIT_CPU, &mut current) })?;

        let soft = libc::rlim_t::try_from(seconds).unwrap_or(libc::RLIM_INFINITY);
        // Soft < hard so the child sees SIGXCPU rather than a bare SIGKILL.
        let hard = soft.saturating_add(1).min(current.rlim_max);
        let cpu = libc::rlimit {
            rlim_cur: soft.min(hard),
            rlim_max: hard,
        };
        check(unsafe { libc::setrlimit(libc::RLIMIT_CPU, &cpu) })?;
    }

    #[cfg(target_os = "linux")]
    if limits.no_new_privileges {
        check(unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) })?;
    }

    Ok(())
}

#[cfg(unix)]
fn check(ret: libc::c_int) -> io::Result<()> {
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_enables_every_restriction() {
        let limits = ChildLimits::strict(Some(10));
        assert_eq!(limits.cpu_seconds, Some(10));
        assert!(limits.disable_core_dumps);
        assert!(limits.no_new_privileges);
        assert_eq!(ChildLimits::default().cpu_seconds, None);
    }
}
