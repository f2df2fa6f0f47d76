//! `*` wildcard matching for cache invalidation.

/// Match `key` against `pattern`, where `*` matches any (possibly empty)
/// substring and every other character matches itself.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let mut parts = pattern.split('*');

    // split always yields at least one item
    let first = parts.next().unwrap_or_default();
    let Some(mut rest) = key.strip_prefix(first) else {
        return false;
    };

    let segments: Vec<&str> = parts.collect();
    let Some((last, middle)) = segments.split_last() else {
        // no wildcard at all
        return rest.is_empty();
    };

    for segment in middle {
        match rest.find(segment) {
            Some(idx) => rest = &rest[idx + segment.len()..],
            None => return false,
        }
    }

    rest.len() >= last.len() && rest.ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact() {
        assert!(glob_match("issue:1", "issue:1"));
        assert!(!glob_match("issue:1", "issue:12"));
    }

    #[test]
    fn test_prefix() {
        assert!(glob_match("issue:*", "issue:42"));
        assert!(glob_match("issue:*", "issue:"));
        assert!(!glob_match("issue:*", "issues:42"));
        assert!(!glob_match("issue:*", "project:issue:1"));
    }

    #[test]
    fn test_suffix_and_contains() {
        assert!(glob_match("*:open", "issues:o/r:open"));
        assert!(!glob_match("*:open", "issues:o/r:closed"));
        assert!(glob_match("*/milestones*", "rest:GET:/repos/o/r/milestones?state=all"));
        assert!(!glob_match("*/milestones*", "rest:GET:/repos/o/r/issues"));
    }

    #[test]
    fn test_multiple_wildcards() {
        assert!(glob_match("rest:*:/repos/*/issues*", "rest:GET:/repos/o/r/issues/1"));
        assert!(!glob_match("rest:*:/repos/*/issues*", "rest:GET:/repos/o/r/labels"));
        assert!(glob_match("a*b*a", "aba"));
        assert!(!glob_match("a*a", "a"));
        assert!(glob_match("*", ""));
    }
}
