//! Shell-style wildcard matching
//!
//! Shared by constraint matching, object selectors and ignore-field checks so
//! that every component agrees on what a pattern means.
//!
//! Semantics:
//! - Matching is case-sensitive
//! - `*` matches any run of characters, including the empty run and `.`
//! - Every other character (including `?`) is literal

/// Check whether `value` matches the wildcard `pattern`
pub fn match_pattern(pattern: &str, value: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == value;
    }

    let pattern: Vec<char> = pattern.chars().collect();
    let value: Vec<char> = value.chars().collect();

    let (mut p, mut v) = (0usize, 0usize);
    // Position of the last `*` seen and the value index it was tried against
    let mut backtrack: Option<(usize, usize)> = None;

    while let Some(current) = value.get(v) {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, v));
                p += 1;
            }
            Some(c) if c == current => {
                p += 1;
                v += 1;
            }
            _ => match backtrack {
                // Let the last star absorb one more character and retry
                Some((star, consumed)) => {
                    p = star + 1;
                    v = consumed + 1;
                    backtrack = Some((star, consumed + 1));
                }
                None => return false,
            },
        }
    }

    pattern.iter().skip(p).all(|c| *c == '*')
}

/// Check whether `value` matches at least one of `patterns`
pub fn match_any<S: AsRef<str>>(patterns: &[S], value: &str) -> bool {
    patterns.iter().any(|p| match_pattern(p.as_ref(), value))
}
