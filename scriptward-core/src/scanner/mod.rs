//! Static deny-list scanner for untrusted Python snippets.
//!
//! Two passes, cheapest first:
//! - [`lexical_pass`] looks for suspicious substrings in the lower-cased text.
//! - [`structural_pass`] parses with tree-sitter and judges imports, calls,
//!   name references and dunder attributes.
//!
//! A final raw-text recheck catches a few constructs that neither pass
//! models. Aliasing and dynamically built names are not detected; the
//! executor's restricted namespace is the containment boundary, this is a
//! speed bump in front of it.

mod lexical;
mod structural;

pub use lexical::lexical_pass;
pub use structural::structural_pass;

use scriptward_config::PolicySet;
use serde::Serialize;
use tracing::debug;

use crate::error::ScanViolation;

/// Outcome of one scan, in the shape reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanVerdict {
    pub allowed: bool,
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation: Option<ScanViolation>,
}

impl From<Option<ScanViolation>> for ScanVerdict {
    fn from(violation: Option<ScanViolation>) -> Self {
        Self {
            allowed: violation.is_none(),
            reason: violation.as_ref().map(ToString::to_string),
            violation,
        }
    }
}

/// First violation in `source`, or `None` when it may run.
///
/// When the lexical pass trips, the structural pass is consulted for a more
/// precise reason (`import os` reports the import, not the token); the
/// token itself is reported when the tree walk finds nothing.
pub fn scan(source: &str, policy: &PolicySet) -> Option<ScanViolation> {
    let violation = find_violation(source, policy);
    if let Some(violation) = &violation {
        debug!(%violation, "script rejected by scanner");
    }
    violation
}

/// Convenience wrapper producing a [`ScanVerdict`].
pub fn verdict(source: &str, policy: &PolicySet) -> ScanVerdict {
    ScanVerdict::from(scan(source, policy))
}

fn find_violation(source: &str, policy: &PolicySet) -> Option<ScanViolation> {
    if let Some(token) = lexical_pass(source, policy) {
        return Some(match structural_pass(source, policy) {
            Some(ScanViolation::SyntaxError { .. }) | None => ScanViolation::SuspiciousToken(token),
            Some(precise) => precise,
        });
    }

    if let Some(violation) = structural_pass(source, policy) {
        return Some(violation);
    }

    policy
        .first_raw_recheck_token(source)
        .map(|token| ScanViolation::SuspiciousToken(token.to_owned()))
}
