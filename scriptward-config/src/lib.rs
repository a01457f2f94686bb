//! Startup configuration for scriptward.
//!
//! Everything here is resolved once when the process starts and then shared
//! read-only: the installation layout, the allowed roots, the numeric limits,
//! and the deny-lists used by the scanner and guards.

pub mod constants;
pub mod limits;
pub mod loader;
pub mod policy;
pub mod roots;

pub use limits::Limits;
pub use loader::{FileConfig, Layout, MemoryConfig, PythonConfig, RecallIndexKind, SandboxConfig};
pub use policy::PolicySet;
pub use roots::AllowedRoots;
