//! Token-set similarity for selector repair.
//!
//! The repair path only cares about one contract: "is this element's text
//! close enough to the sample content" at a 0.5 threshold. The measure used
//! here is the overlap coefficient over lowercased alphanumeric tokens,
//! which stays high when one string is a subset of the other; the common
//! case when a page wraps the same title in extra chrome.

use std::collections::HashSet;

/// Pluggable similarity function: `(a, b) -> [0.0, 1.0]`.
pub type SimilarityFn = fn(&str, &str) -> f64;

fn tokens(s: &str) -> HashSet<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Token-set ratio: `|A ∩ B| / min(|A|, |B|)`. Empty input scores 0.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let ta = tokens(a);
    let tb = tokens(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let shared = ta.intersection(&tb).count();
    shared as f64 / ta.len().min(tb.len()) as f64
}
