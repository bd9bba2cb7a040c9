//! Duplicate collapsing by matcher signature.

use super::options::DuplicateStrategy;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};

/// What makes two mocks indistinguishable to the mock engine
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct Signature {
    pub method: String,
    pub path: String,
    pub headers: Option<BTreeMap<String, String>>,
}

/// Apply `strategy`, returning survivors in input order and the number
/// discarded.
pub(crate) fn deduplicate<T>(
    items: Vec<T>,
    strategy: DuplicateStrategy,
    signature: impl Fn(&T) -> Signature,
    captured_at: impl Fn(&T) -> DateTime<Utc>,
) -> (Vec<T>, usize) {
    if strategy == DuplicateStrategy::All {
        return (items, 0);
    }

    // signature -> (timestamp, index) of the current winner
    let mut winners: HashMap<Signature, (DateTime<Utc>, usize)> = HashMap::new();
    for (idx, item) in items.iter().enumerate() {
        let candidate = (captured_at(item), idx);
        winners
            .entry(signature(item))
            .and_modify(|current| {
                let better = match strategy {
                    DuplicateStrategy::First => candidate < *current,
                    _ => candidate > *current,
                };
                if better {
                    *current = candidate;
                }
            })
            .or_insert(candidate);
    }

    let keep: HashSet<usize> = winners.values().map(|(_, idx)| *idx).collect();
    let total = items.len();
    let survivors: Vec<T> = items
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| keep.contains(idx))
        .map(|(_, item)| item)
        .collect();
    let discarded = total - survivors.len();
    (survivors, discarded)
}
