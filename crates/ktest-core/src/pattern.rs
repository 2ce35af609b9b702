//! Wildcard matching of test names.
//!
//! A pattern is a literal string where `*` matches zero or more characters.
//! Matching is case-sensitive and always covers the whole name.

/// Returns `true` if `name` matches `pattern` in full.
///
/// Runs in `O(name * pattern)` worst case using the usual single-star
/// backtracking: on mismatch, resume right after the most recent `*` and
/// let it swallow one more character.
pub fn matches(name: &str, pattern: &str) -> bool {
    let name: Vec<char> = name.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    let (mut n, mut p) = (0usize, 0usize);
    // (pattern index after the star, name index the star is matched up to)
    let mut backtrack: Option<(usize, usize)> = None;

    while n < name.len() {
        match pattern.get(p) {
            Some('*') => {
                p += 1;
                backtrack = Some((p, n));
            }
            Some(&c) if c == name[n] => {
                p += 1;
                n += 1;
            }
            _ => match backtrack {
                Some((star_p, star_n)) => {
                    p = star_p;
                    n = star_n + 1;
                    backtrack = Some((star_p, star_n + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

/// Returns `true` if `name` matches at least one of `patterns`.
pub fn matches_any<S: AsRef<str>>(name: &str, patterns: &[S]) -> bool {
    patterns.iter().any(|pattern| matches(name, pattern.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_pattern() {
        assert!(matches("net_alloc", "net_alloc"));
        assert!(!matches("net_alloc", "net_allo"));
        assert!(!matches("net_allo", "net_alloc"));
    }

    #[test]
    fn test_star_matches_everything() {
        assert!(matches("", "*"));
        assert!(matches("anything at all", "*"));
        assert!(matches("x", "**"));
    }

    #[test]
    fn test_prefix_and_suffix() {
        assert!(matches("net_alloc", "net_*"));
        assert!(matches("net_", "net_*"));
        assert!(!matches("fs_read", "net_*"));
        assert!(matches("buddy_pmm_test", "*_test"));
        assert!(!matches("buddy_pmm_test_2", "*_test"));
    }

    #[test]
    fn test_inner_star_backtracks() {
        assert!(matches("abcbcd", "a*bcd"));
        assert!(matches("hash_map_insert_remove", "hash*insert*"));
        assert!(!matches("hash_map_remove", "hash*insert*"));
        assert!(matches("aaa", "a*a*a"));
        assert!(!matches("aa", "a*a*a"));
    }

    #[test]
    fn test_empty_pattern_only_matches_empty_name() {
        assert!(matches("", ""));
        assert!(!matches("x", ""));
    }

    #[test]
    fn test_case_sensitive() {
        assert!(!matches("Net_alloc", "net_*"));
    }

    #[test]
    fn test_not_a_substring_search() {
        assert!(!matches("my_net_alloc", "net_*"));
        assert!(matches("my_net_alloc", "*net_*"));
    }

    #[test]
    fn test_matches_any() {
        let patterns = vec!["net_*".to_string(), "fs_read".to_string()];
        assert!(matches_any("fs_read", &patterns));
        assert!(matches_any("net_tx", &patterns));
        assert!(!matches_any("fs_write", &patterns));
        assert!(!matches_any::<&str>("fs_write", &[]));
    }
}
