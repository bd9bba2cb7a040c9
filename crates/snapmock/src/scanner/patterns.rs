//! Token-shape detectors used by the scanner.

use once_cell::sync::Lazy;
use regex::Regex;

/// Three base64url segments, the first two being encoded JSON objects
static JWT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"eyJ[A-Za-z0-9_-]{5,}\.eyJ[A-Za-z0-9_-]{5,}\.[A-Za-z0-9_-]*").expect("valid regex")
});

/// 13-19 digits, optionally grouped by spaces or dashes
static CARD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d(?:[ -]?\d){12,18}\b").expect("valid regex"));

static HEX_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[0-9a-fA-F]{8,}\b").expect("valid regex"));

/// RFC 4648 base32 alphabet with optional `=` padding
static BASE32_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z2-7]{8,}\b=*").expect("valid regex"));

/// `"apiKey": "..."`, `token=...` and friends
static KEY_VALUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)["']?\b(api[_-]?key|apikey|access[_-]?token|refresh[_-]?token|auth[_-]?token|client[_-]?secret|secret|password|token)\b["']?\s*[:=]\s*["']?([^"'\s&,;}]+)"#,
    )
    .expect("valid regex")
});

pub(crate) fn find_jwt(text: &str) -> Option<&str> {
    JWT.find(text).map(|m| m.as_str())
}

pub(crate) fn looks_like_jwt(token: &str) -> bool {
    JWT.find(token)
        .is_some_and(|m| m.start() == 0 && m.end() == token.len())
}

/// First Luhn-valid card-shaped digit sequence
pub(crate) fn find_card_number(text: &str) -> Option<String> {
    CARD.find_iter(text)
        .map(|m| m.as_str().chars().filter(|c| c.is_ascii_digit()).collect::<String>())
        .find(|digits| (13..=19).contains(&digits.len()) && luhn_valid(digits))
}

/// First hex run of at least `min_len` characters mixing digits and letters
pub(crate) fn find_hex_token(text: &str, min_len: usize) -> Option<&str> {
    HEX_RUN
        .find_iter(text)
        .map(|m| m.as_str())
        .find(|s| {
            s.len() >= min_len
                && s.chars().any(|c| c.is_ascii_digit())
                && s.chars().any(|c| c.is_ascii_alphabetic())
        })
}

/// First base32 run of at least `min_len` characters (padding excluded)
/// mixing digits and letters
pub(crate) fn find_base32_token(text: &str, min_len: usize) -> Option<&str> {
    BASE32_RUN
        .find_iter(text)
        .map(|m| m.as_str())
        .find(|s| {
            let body = s.trim_end_matches('=');
            body.len() >= min_len
                && body.chars().any(|c| c.is_ascii_digit())
                && body.chars().any(|c| c.is_ascii_uppercase())
        })
}

/// First credential-named key whose value is at least `min_len` long
pub(crate) fn find_credential_pair(text: &str, min_len: usize) -> Option<String> {
    KEY_VALUE
        .captures_iter(text)
        .filter(|c| c.get(2).is_some_and(|v| v.as_str().len() >= min_len))
        .find_map(|c| c.get(1).map(|k| k.as_str().to_string()))
}

/// Header names that conventionally carry credentials
pub(crate) fn is_key_header(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    ["api-key", "apikey", "api_key", "token", "secret", "x-auth"]
        .iter()
        .any(|needle| name.contains(needle))
}

pub(crate) fn luhn_valid(digits: &str) -> bool {
    let mut sum = 0;
    for (i, c) in digits.chars().rev().enumerate() {
        let Some(mut d) = c.to_digit(10) else {
            return false;
        };
        if i % 2 == 1 {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
    }
    !digits.is_empty() && sum % 10 == 0
}

/// `abcd…wxyz` style preview that never prints the whole secret
pub(crate) fn redact(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}
