use std::collections::HashSet;

use crate::constants::policy;

/// Deny-lists shared by every scan and guard call.
///
/// Built once at startup and handed around behind an `Arc`; nothing mutates
/// it afterwards.
#[derive(Debug, Clone)]
pub struct PolicySet {
    pub blocked_imports: HashSet<String>,
    pub blocked_calls: HashSet<String>,
    pub blocked_names: HashSet<String>,
    /// Core names of forbidden dunder attributes (`class` for `__class__`).
    pub blocked_attributes: HashSet<String>,
    /// Introspection attributes denied by exact name.
    pub reflection_attributes: HashSet<String>,
    pub suspicious_tokens: Vec<String>,
    pub raw_recheck_tokens: Vec<String>,
    pub gui_keywords: Vec<String>,
    pub output_leak_markers: Vec<String>,
    pub shared_content_markers: Vec<String>,
    pub allowed_url_schemes: HashSet<String>,
    pub blocked_hosts: HashSet<String>,
}

impl Default for PolicySet {
    fn default() -> Self {
        Self {
            blocked_imports: to_set(policy::BLOCKED_IMPORTS),
            blocked_calls: to_set(policy::BLOCKED_CALLS),
            blocked_names: to_set(policy::BLOCKED_NAMES),
            blocked_attributes: to_set(policy::BLOCKED_ATTRIBUTES),
            reflection_attributes: to_set(policy::REFLECTION_ATTRIBUTES),
            suspicious_tokens: to_vec(policy::SUSPICIOUS_TOKENS),
            raw_recheck_tokens: to_vec(policy::RAW_RECHECK_TOKENS),
            gui_keywords: to_vec(policy::GUI_KEYWORDS),
            output_leak_markers: to_vec(policy::OUTPUT_LEAK_MARKERS),
            shared_content_markers: to_vec(policy::SHARED_CONTENT_MARKERS),
            allowed_url_schemes: to_set(policy::ALLOWED_URL_SCHEMES),
            blocked_hosts: to_set(policy::BLOCKED_HOSTS),
        }
    }
}

impl PolicySet {
    /// Import roots are compared case-insensitively.
    pub fn is_blocked_import(&self, root_module: &str) -> bool {
        self.blocked_imports
            .contains(&root_module.to_ascii_lowercase())
    }

    pub fn is_blocked_call(&self, name: &str) -> bool {
        self.blocked_calls.contains(name)
    }

    pub fn is_blocked_name(&self, name: &str) -> bool {
        self.blocked_names.contains(name)
    }

    /// True for `__name__`-shaped attributes whose core name is denied and
    /// for frame introspection attributes.
    pub fn is_blocked_attribute(&self, attribute: &str) -> bool {
        if self.reflection_attributes.contains(attribute) {
            return true;
        }
        attribute
            .strip_prefix("__")
            .and_then(|rest| rest.strip_suffix("__"))
            .is_some_and(|core| self.blocked_attributes.contains(core))
    }

    /// First suspicious token present in `lowered`, in list order.
    pub fn first_suspicious_token(&self, lowered: &str) -> Option<&str> {
        self.suspicious_tokens
            .iter()
            .map(String::as_str)
            .find(|token| lowered.contains(token))
    }

    pub fn first_raw_recheck_token(&self, source: &str) -> Option<&str> {
        self.raw_recheck_tokens
            .iter()
            .map(String::as_str)
            .find(|token| source.contains(token))
    }

    pub fn gui_keyword_in(&self, source: &str) -> Option<&str> {
        let lowered = source.to_lowercase();
        self.gui_keywords
            .iter()
            .map(String::as_str)
            .find(|keyword| lowered.contains(keyword))
    }

    /// First forbidden marker contained in `content`, compared case-insensitively.
    pub fn shared_content_marker_in(&self, content: &str) -> Option<&str> {
        let lowered = content.to_lowercase();
        self.shared_content_markers
            .iter()
            .map(String::as_str)
            .find(|marker| lowered.contains(&marker.to_lowercase()))
    }
}

fn to_set(items: &[&str]) -> HashSet<String> {
    items.iter().map(|item| (*item).to_owned()).collect()
}

fn to_vec(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| (*item).to_owned()).collect()
}
