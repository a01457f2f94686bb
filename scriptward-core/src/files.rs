//! Text reads from the allowed roots.

use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;

use scriptward_commons::truncate_chars;
use tracing::debug;

use crate::error::SandboxError;
use crate::guards::check_existing_file;

/// Read `candidate` as text when it resolves inside one of `roots`.
///
/// At most `max_chars` characters are returned; longer files end with the
/// truncation marker. Invalid UTF-8 is replaced rather than rejected.
pub fn read_allowed_file(
    candidate: &str,
    roots: &[PathBuf],
    max_chars: usize,
) -> Result<String, SandboxError> {
    let path = check_existing_file(candidate, roots)?;
    let file = File::open(&path).map_err(|source| SandboxError::Io {
        path: path.clone(),
        source,
    })?;
    let text = read_truncated(file, Vec::new(), max_chars).map_err(|source| SandboxError::Io {
        path: path.clone(),
        source,
    })?;
    debug!(path = %path.display(), chars = text.chars().count(), "read allowed file");
    Ok(text)
}

/// Read from `reader` after the already consumed `prefix`, keeping enough
/// bytes to decide whether the text exceeds `max_chars`.
pub(crate) fn read_truncated(
    reader: impl Read,
    prefix: Vec<u8>,
    max_chars: usize,
) -> io::Result<String> {
    // A char is at most four bytes, so this always overruns a longer text.
    let byte_budget = max_chars.saturating_mul(4).saturating_add(4);
    let mut bytes = prefix;
    let remaining = byte_budget.saturating_sub(bytes.len());
    reader
        .take(u64::try_from(remaining).unwrap_or(u64::MAX))
        .read_to_end(&mut bytes)?;

    let (text, _) = truncate_chars(&String::from_utf8_lossy(&bytes), max_chars);
    Ok(text)
}
