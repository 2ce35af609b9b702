//! Inclusion/exclusion selection of discovered test names.

use serde::{Deserialize, Serialize};

use crate::pattern::matches_any;

/// Decide whether `name` is scheduled.
///
/// Selected iff (`filters` is empty OR `name` matches some filter) AND
/// `name` matches no block. Blocks always win.
pub fn is_selected<S: AsRef<str>>(name: &str, filters: &[S], blocks: &[S]) -> bool {
    let included = filters.is_empty() || matches_any(name, filters);
    included && !matches_any(name, blocks)
}

/// Owned pair of pattern lists, evaluated per name as tests are discovered.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestFilter {
    /// Inclusion patterns. Empty means "everything".
    pub filters: Vec<String>,

    /// Exclusion patterns.
    pub blocks: Vec<String>,
}

impl TestFilter {
    /// Create a filter from inclusion and exclusion patterns.
    pub fn new(filters: Vec<String>, blocks: Vec<String>) -> Self {
        Self { filters, blocks }
    }

    /// See [`is_selected`].
    pub fn is_selected(&self, name: &str) -> bool {
        is_selected(name, &self.filters, &self.blocks)
    }

    /// Whether `name` was picked by an inclusion pattern (as opposed to the
    /// empty-filter default).
    pub fn explicitly_included(&self, name: &str) -> bool {
        matches_any(name, &self.filters) && !matches_any(name, &self.blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_filters_select_everything() {
        assert!(is_selected::<&str>("anything", &[], &[]));
    }

    #[test]
    fn test_filter_restricts() {
        let filter = TestFilter::new(strings(&["net_*"]), vec![]);
        assert!(filter.is_selected("net_alloc"));
        assert!(!filter.is_selected("fs_read"));
    }

    #[test]
    fn test_block_without_filters() {
        let filter = TestFilter::new(vec![], strings(&["legacy_*"]));
        assert!(filter.is_selected("core_y"));
        assert!(!filter.is_selected("legacy_x"));
    }

    #[test]
    fn test_block_wins_over_filter() {
        let filter = TestFilter::new(strings(&["net_*"]), strings(&["net_slow*"]));
        assert!(filter.is_selected("net_fast"));
        assert!(!filter.is_selected("net_slow_path"));
    }

    #[test]
    fn test_explicitly_included() {
        let everything = TestFilter::default();
        assert!(everything.is_selected("manual_fault"));
        assert!(!everything.explicitly_included("manual_fault"));

        let named = TestFilter::new(strings(&["manual_*"]), vec![]);
        assert!(named.explicitly_included("manual_fault"));
    }
}
