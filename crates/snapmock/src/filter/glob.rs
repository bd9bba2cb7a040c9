//! Glob patterns compiled to anchored regular expressions.
//!
//! Syntax:
//! - `*` matches any run of characters except `/`
//! - `**` matches any run of characters including `/`
//! - `?` matches one character except `/`
//!
//! Everything else is literal. Matching is case-sensitive.

use regex::Regex;
use std::fmt;

#[derive(Clone)]
pub struct Glob {
    pattern: String,
    regex: Regex,
}

impl Glob {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&glob_to_regex(pattern))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn is_match(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

impl fmt::Debug for Glob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Glob").field(&self.pattern).finish()
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    out.push_str(".*");
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' => out.push_str("[^/]"),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_pattern() {
        let glob = Glob::new("/api/users").unwrap();
        assert!(glob.is_match("/api/users"));
        assert!(!glob.is_match("/api/users/1"));
        assert!(!glob.is_match("/API/users"));
    }

    #[test]
    fn test_single_star_stops_at_slash() {
        let glob = Glob::new("/api/*").unwrap();
        assert!(glob.is_match("/api/users"));
        assert!(!glob.is_match("/api/users/1"));
    }

    #[test]
    fn test_double_star_crosses_slash() {
        let glob = Glob::new("/api/**").unwrap();
        assert!(glob.is_match("/api/users/1/orders"));
        assert!(!glob.is_match("/other/api"));
    }

    #[test]
    fn test_host_wildcard() {
        let glob = Glob::new("*.internal.test").unwrap();
        assert!(glob.is_match("svc.internal.test"));
        assert!(glob.is_match("a.b.internal.test"));
        assert!(!glob.is_match("internal.test"));
        assert!(!glob.is_match("svc.internal.test.evil"));
    }

    #[test]
    fn test_question_mark_and_metacharacters() {
        let glob = Glob::new("/v?/items.json").unwrap();
        assert!(glob.is_match("/v1/items.json"));
        assert!(!glob.is_match("/v1/itemsXjson"));
        assert!(!glob.is_match("/v12/items.json"));
    }
}
