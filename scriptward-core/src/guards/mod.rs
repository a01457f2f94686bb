//! Cheap, deterministic gates evaluated before any privileged operation.

pub mod path;
pub mod shared;
pub mod url;

pub use path::{check_existing_file, check_path};
pub use shared::{SharedEntry, SharedStore, resolve_shared_path};
pub use url::check_url;
