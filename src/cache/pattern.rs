//! Glob matching for cache key patterns (`*` and `?`)

/// Match `key` against a glob where `*` matches any run of characters and
/// `?` matches exactly one.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let k: Vec<char> = key.chars().collect();

    let (mut pi, mut ki) = (0, 0);
    // Last `*` seen and the key position it is currently absorbing up to
    let mut star: Option<(usize, usize)> = None;

    while ki < k.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == k[ki]) {
            pi += 1;
            ki += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ki));
            pi += 1;
        } else if let Some((sp, sk)) = star {
            pi = sp + 1;
            ki = sk + 1;
            star = Some((sp, sk + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal() {
        assert!(glob_match("search:abc", "search:abc"));
        assert!(!glob_match("search:abc", "search:abd"));
        assert!(!glob_match("search", "search:abc"));
    }

    #[test]
    fn test_star() {
        assert!(glob_match("*", ""));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("search:*", "search:"));
        assert!(glob_match("search:*", "search:9f2c"));
        assert!(glob_match("*:meta", "img_7:meta"));
        assert!(glob_match("a*b*c", "axxbyyc"));
        assert!(!glob_match("a*b*c", "axxbyy"));
        assert!(!glob_match("search:*", "meta:1"));
    }

    #[test]
    fn test_question_mark() {
        assert!(glob_match("k?", "k1"));
        assert!(!glob_match("k?", "k"));
        assert!(!glob_match("k?", "k12"));
    }
}
