//! Process-group helpers for reliable child cleanup.
//!
//! - `detach_from_tty` runs in `pre_exec` so the child leads a new session
//!   and process group, which makes every descendant killable at once.
//! - `set_parent_death_signal` (Linux only) kills the child if this process
//!   dies first, and re-checks the parent PID to close the fork/exec race.
//! - `kill_process_group` sends `SIGKILL` to a whole group.
//! - `is_process_group_alive` / `wait_for_group_exit` confirm the group is
//!   really gone, not merely signalled.
//!
//! On non-Unix platforms these helpers are no-ops.

use std::io;
use std::time::Duration;

/// Interval between liveness probes while waiting for a group to disappear.
const GROUP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Deliver `SIGKILL` to the child when the original parent dies.
///
/// Must run inside `pre_exec`; `parent_pid` is captured before the fork.
#[cfg(target_os = "linux")]
pub fn set_parent_death_signal(parent_pid: libc::pid_t) -> io::Result<()> {
    if unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) } == -1 {
        return Err(io::Error::last_os_error());
    }

    // The parent may have exited between fork and prctl.
    if unsafe { libc::getppid() } != parent_pid {
        unsafe {
            libc::raise(libc::SIGKILL);
        }
    }

    Ok(())
}

/// Start a new session so the child leads its own process group and has no
/// controlling terminal.
#[cfg(unix)]
pub fn detach_from_tty() -> io::Result<()> {
    if unsafe { libc::setsid() } == -1 {
        let err = io::Error::last_os_error();
        // Already a session leader: a fresh process group is still enough.
        if err.raw_os_error() == Some(libc::EPERM) {
            return set_process_group();
        }
        return Err(err);
    }
    Ok(())
}

#[cfg(unix)]
fn set_process_group() -> io::Result<()> {
    if unsafe { libc::setpgid(0, 0) } == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Send `SIGKILL` to every process in the group. A group that no longer
/// exists is not an error.
#[cfg(unix)]
pub fn kill_process_group(process_group_id: u32) -> io::Result<()> {
    let Ok(pgid) = libc::pid_t::try_from(process_group_id) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("process group id {process_group_id} out of range"),
        ));
    };

    if unsafe { libc::killpg(pgid, libc::SIGKILL) } == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err);
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn kill_process_group(_process_group_id: u32) -> io::Result<()> {
    Ok(())
}

/// True while any member of the group (zombies included) still exists.
#[cfg(unix)]
pub fn is_process_group_alive(process_group_id: u32) -> bool {
    let Ok(pgid) = libc::pid_t::try_from(process_group_id) else {
        return false;
    };
    // Signal 0 probes without delivering anything.
    if unsafe { libc::killpg(pgid, 0) } == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn is_process_group_alive(_process_group_id: u32) -> bool {
    false
}

/// True while a process with this PID exists.
#[cfg(unix)]
pub fn is_process_running(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    // EPERM: exists but owned by someone else.
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn is_process_running(_pid: u32) -> bool {
    false
}

/// Poll until the group has no members left or `timeout` elapses.
///
/// Returns `true` when the group is confirmed gone.
pub async fn wait_for_group_exit(process_group_id: u32, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while is_process_group_alive(process_group_id) {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(GROUP_POLL_INTERVAL).await;
    }
    true
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn killing_missing_group_is_not_an_error() {
        assert!(kill_process_group(2_000_000_000).is_ok());
    }

    #[test]
    fn current_process_is_running() {
        assert!(is_process_running(std::process::id()));
        assert!(!is_process_running(2_000_000_000));
    }

    #[test]
    fn missing_group_is_not_alive() {
        assert!(!is_process_group_alive(2_000_000_000));
    }

    #[tokio::test]
    async fn waiting_on_missing_group_returns_immediately() {
        assert!(wait_for_group_exit(2_000_000_000, Duration::from_millis(50)).await);
    }
}
