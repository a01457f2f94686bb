//! Isolated child-process execution for scriptward.
//!
//! Children run in their own session and process group with a rebuilt
//! environment, CPU and core-dump rlimits, and a wall-clock deadline. On
//! every exit path the whole group is killed and reaped.

pub mod env;
pub mod launcher;
pub mod process_group;
pub mod rlimits;

pub use env::{PRESERVED_ENV_VARS, SANDBOX_ACTIVE_ENV_VAR, build_sanitized_env, current_env};
pub use launcher::{
    CapturedRun, CommandStatus, IsolatedLauncher, LaunchError, LaunchSpec, ProcessLauncher,
};
pub use process_group::{is_process_group_alive, is_process_running, kill_process_group};
pub use rlimits::ChildLimits;
