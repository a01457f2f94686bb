//! Small helpers shared across the scriptward crates.
//!
//! Nothing in here makes policy decisions. The guards in `scriptward-core`
//! build on these primitives: symlink-aware path resolution, component-wise
//! containment, and the text scrubbing applied to sandbox output.

pub mod paths;
pub mod sanitizer;

pub use paths::{
    common_prefix, expand_home, is_within, lexical_normalize, normalize_separators,
    resolve_real_path,
};
pub use sanitizer::{TRUNCATION_MARKER, scrub_output_lines, truncate_chars};
