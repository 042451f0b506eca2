//! Utility functions for qroute

/// Safely truncate a string at character boundaries (not byte boundaries).
/// This prevents panics when truncating multi-byte UTF-8 characters.
///
/// # Example
/// ```
/// use qroute_core::util::safe_truncate;
///
/// assert_eq!(safe_truncate("Hello, world!", 5), "Hello");
/// assert_eq!(safe_truncate("日本語テスト", 3), "日本語");
/// ```
#[inline]
pub fn safe_truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Truncate and append "..." when anything was cut off.
///
/// Provider error bodies can be arbitrarily large; outcomes keep only a prefix.
///
/// # Example
/// ```
/// use qroute_core::util::safe_truncate_with_ellipsis;
///
/// assert_eq!(safe_truncate_with_ellipsis("connection reset", 10), "connection...");
/// assert_eq!(safe_truncate_with_ellipsis("timeout", 10), "timeout");
/// ```
pub fn safe_truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    let truncated = safe_truncate(s, max_chars);
    if truncated.len() == s.len() {
        s.to_string()
    } else {
        format!("{truncated}...")
    }
}

/// Key used for per-model routing performance, `"{provider}:{model}"`.
pub fn performance_key(provider: &str, model: &str) -> String {
    format!("{provider}:{model}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_truncate_ascii() {
        assert_eq!(safe_truncate("hello world", 5), "hello");
        assert_eq!(safe_truncate("hi", 5), "hi");
        assert_eq!(safe_truncate("", 5), "");
    }

    #[test]
    fn test_safe_truncate_unicode() {
        assert_eq!(safe_truncate("🎉🎊🎈", 2), "🎉🎊");
        assert_eq!(safe_truncate("Hello 世界", 7), "Hello 世");
    }

    #[test]
    fn test_safe_truncate_with_ellipsis() {
        assert_eq!(safe_truncate_with_ellipsis("hello world", 5), "hello...");
        assert_eq!(safe_truncate_with_ellipsis("hello", 5), "hello");
        assert_eq!(safe_truncate_with_ellipsis("ünïcödé", 3), "ünï...");
    }

    #[test]
    fn test_performance_key() {
        assert_eq!(performance_key("anthropic", "claude-3-haiku"), "anthropic:claude-3-haiku");
    }
}
