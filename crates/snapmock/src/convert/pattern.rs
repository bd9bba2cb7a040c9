//! Path pattern inference.
//!
//! Recordings are grouped by method, host, segment count and a skeleton in
//! which dynamic-shaped segments are wildcards and every other segment is
//! literal. Inside a group each wildcard position is classified across all
//! recordings; only positions that vary and hold the same dynamic shape in
//! every recording become named parameters. Free-form segments never do.

use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    /// Same value in every recording of the group
    Literal,
    Numeric,
    Uuid,
    /// All-hex identifier with at least one digit
    Hex,
    /// Varies, but not with a recognized identifier shape
    Free,
}

impl SegmentKind {
    pub fn is_dynamic(self) -> bool {
        matches!(self, SegmentKind::Numeric | SegmentKind::Uuid | SegmentKind::Hex)
    }
}

/// Shape of a single segment value. Never returns `Literal`, which is a
/// property of a position across a group.
///
/// `Hex` needs at least one digit besides the length threshold; an all-letter
/// hex value like `deadbeefcafe` reads as a word and is `Free`.
pub fn classify_value(segment: &str, min_hex_len: usize) -> SegmentKind {
    if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
        SegmentKind::Numeric
    } else if is_uuid(segment) {
        SegmentKind::Uuid
    } else if segment.len() >= min_hex_len
        && segment.bytes().all(|b| b.is_ascii_hexdigit())
        && segment.bytes().any(|b| b.is_ascii_digit())
    {
        SegmentKind::Hex
    } else {
        SegmentKind::Free
    }
}

/// Kind of one segment position across every recording in a group.
pub fn classify_position(values: &[&str], min_hex_len: usize) -> SegmentKind {
    let Some(first) = values.first() else {
        return SegmentKind::Literal;
    };
    if values.iter().all(|v| v == first) {
        return SegmentKind::Literal;
    }

    let kinds: HashSet<SegmentKind> = values
        .iter()
        .map(|v| classify_value(v, min_hex_len))
        .collect();
    if kinds.len() == 1 {
        // Single shape shared by every value
        return kinds.into_iter().next().unwrap_or(SegmentKind::Free);
    }
    // Numbers are valid hex, so a numeric/hex mix is still an identifier
    if kinds
        .iter()
        .all(|k| matches!(k, SegmentKind::Numeric | SegmentKind::Hex))
    {
        return SegmentKind::Hex;
    }
    SegmentKind::Free
}

/// Canonical 8-4-4-4-12 hex form
fn is_uuid(s: &str) -> bool {
    let groups: Vec<&str> = s.split('-').collect();
    groups.len() == 5
        && groups
            .iter()
            .zip([8, 4, 4, 4, 12])
            .all(|(g, len)| g.len() == len && g.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// Segments of a path without the leading `/`; `/` alone has none.
pub(crate) fn split_segments(path: &str) -> Vec<&str> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    }
}

pub(crate) fn join_segments<S: AsRef<str>>(segments: &[S]) -> String {
    let mut out = String::from("/");
    let joined: Vec<&str> = segments.iter().map(|s| s.as_ref()).collect();
    out.push_str(&joined.join("/"));
    out
}

/// What a pattern is inferred from
pub(crate) struct PathSample<'a> {
    pub method: &'a str,
    pub host: &'a str,
    pub path: &'a str,
}

#[derive(Hash, PartialEq, Eq)]
struct GroupKey {
    method: String,
    host: String,
    skeleton: Vec<Option<String>>,
}

/// Infer a matcher path for every sample; output order matches input.
pub(crate) fn infer_patterns(samples: &[PathSample<'_>], min_hex_len: usize) -> Vec<String> {
    let segments: Vec<Vec<&str>> = samples.iter().map(|s| split_segments(s.path)).collect();

    let mut groups: HashMap<GroupKey, Vec<usize>> = HashMap::new();
    for (idx, sample) in samples.iter().enumerate() {
        let skeleton = segments[idx]
            .iter()
            .map(|seg| {
                if classify_value(seg, min_hex_len).is_dynamic() {
                    None
                } else {
                    Some(seg.to_string())
                }
            })
            .collect();
        let key = GroupKey {
            method: sample.method.to_ascii_uppercase(),
            host: sample.host.to_ascii_lowercase(),
            skeleton,
        };
        groups.entry(key).or_default().push(idx);
    }

    let mut patterns: Vec<String> = samples.iter().map(|s| s.path.to_string()).collect();
    for (key, members) in groups {
        let names = parameter_names(&key.skeleton, &members, &segments, min_hex_len);
        if names.iter().all(Option::is_none) {
            continue;
        }
        for &idx in &members {
            let pattern: Vec<String> = segments[idx]
                .iter()
                .zip(&names)
                .map(|(seg, name)| match name {
                    Some(name) => format!("{{{name}}}"),
                    None => seg.to_string(),
                })
                .collect();
            patterns[idx] = join_segments(&pattern);
        }
    }
    patterns
}

/// Parameter name per position, `None` where the segment stays literal.
fn parameter_names(
    skeleton: &[Option<String>],
    members: &[usize],
    segments: &[Vec<&str>],
    min_hex_len: usize,
) -> Vec<Option<String>> {
    let mut names: Vec<Option<String>> = Vec::with_capacity(skeleton.len());
    let mut used: HashSet<String> = HashSet::new();
    let mut params = 0usize;

    for (pos, slot) in skeleton.iter().enumerate() {
        if slot.is_some() {
            names.push(None);
            continue;
        }
        let values: Vec<&str> = members.iter().map(|&i| segments[i][pos]).collect();
        if !classify_position(&values, min_hex_len).is_dynamic() {
            names.push(None);
            continue;
        }

        let previous_literal = pos.checked_sub(1).and_then(|p| skeleton[p].as_deref());
        let base = match previous_literal {
            Some(_) if params == 0 => "id".to_string(),
            Some(prev) => match identifier_stem(prev) {
                Some(stem) => format!("{}Id", singularize(&stem)),
                None => "param".to_string(),
            },
            None => "param".to_string(),
        };
        params += 1;
        names.push(Some(unique_name(base, &mut used)));
    }
    names
}

fn unique_name(base: String, used: &mut HashSet<String>) -> String {
    if used.insert(base.clone()) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base}{n}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// `line-items` -> `lineItems`; `None` if nothing usable remains
fn identifier_stem(segment: &str) -> Option<String> {
    let mut out = String::new();
    let mut upper_next = false;
    for c in segment.chars() {
        if c.is_ascii_alphanumeric() {
            if out.is_empty() && c.is_ascii_digit() {
                continue;
            }
            if upper_next && !out.is_empty() {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
            upper_next = false;
        } else {
            upper_next = true;
        }
    }
    (!out.is_empty()).then_some(out)
}

fn singularize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        format!("{stem}y")
    } else if word.ends_with("ss") || word.ends_with("us") {
        word.to_string()
    } else if let Some(stem) = word.strip_suffix('s') {
        stem.to_string()
    } else {
        word.to_string()
    }
}
