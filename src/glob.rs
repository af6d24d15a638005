//! Listing filter: a one-metacharacter glob where `*` matches any run of
//! characters except `.`, and everything else matches literally.

use regex::Regex;

/// A compiled pattern, reusable across many names.
#[derive(Debug)]
pub struct Matcher {
    regex: Option<Regex>,
}

impl Matcher {
    /// Compile `pattern`. `*` becomes `[^.]*`; all other characters are
    /// escaped, so regex metacharacters match themselves. Anchored at both
    /// ends.
    pub fn new(pattern: &str) -> Self {
        let mut source = String::with_capacity(pattern.len() + 8);
        source.push('^');
        for (i, literal) in pattern.split('*').enumerate() {
            if i > 0 {
                source.push_str("[^.]*");
            }
            source.push_str(&regex::escape(literal));
        }
        source.push('$');
        Self {
            regex: Regex::new(&source).ok(),
        }
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.regex.as_ref().map(|r| r.is_match(name)).unwrap_or(false)
    }
}

/// One-shot convenience over [`Matcher`].
pub fn matches(pattern: &str, name: &str) -> bool {
    Matcher::new(pattern).is_match(name)
}
