//! Resource and action pattern matching.

/// Match a resource against a pattern: `*`, `scope:*`, or exact.
pub fn resource_matches(pattern: &str, resource: &str) -> bool {
    let pattern = pattern.trim();
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        // `organizations:*` covers `organizations:42` and `organizations`.
        return resource.starts_with(prefix) || Some(resource) == prefix.strip_suffix(':');
    }
    pattern == resource
}

/// Match an action against a pattern: `*`, a comma-separated list, or exact.
pub fn action_matches(pattern: &str, action: &str) -> bool {
    pattern
        .split(',')
        .map(str::trim)
        .any(|p| p == "*" || p == action)
}
