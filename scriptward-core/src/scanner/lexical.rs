use scriptward_config::PolicySet;

/// First suspicious token found in the lower-cased source, in policy order.
///
/// Pure substring matching: no parsing, so it also trips on tokens inside
/// strings and comments.
pub fn lexical_pass(source: &str, policy: &PolicySet) -> Option<String> {
    let lowered = source.to_lowercase();
    policy
        .first_suspicious_token(&lowered)
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_case_insensitively() {
        let policy = PolicySet::default();
        assert_eq!(
            lexical_pass("IMPORT OS\n", &policy).as_deref(),
            Some("import os")
        );
        assert_eq!(lexical_pass("x = Eval('1')", &policy).as_deref(), Some("eval("));
    }

    #[test]
    fn catches_tokens_inside_strings() {
        let policy = PolicySet::default();
        assert_eq!(
            lexical_pass("note = 'call open( later'", &policy).as_deref(),
            Some("open(")
        );
    }

    #[test]
    fn clean_source_passes() {
        let policy = PolicySet::default();
        assert_eq!(lexical_pass("total = sum(range(10))\nprint(total)", &policy), None);
    }
}
