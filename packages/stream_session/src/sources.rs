//! Citation merging.
//!
//! Source events can arrive in any order and more than once. Each identity is
//! kept once, with the lowest (best) score seen for it in the current answer.

use crate::types::Source;

/// Returns a new source set in which `identity` maps to
/// `min(score, previous score)`, or is appended if it was absent.
///
/// Order of first arrival is preserved. A NaN score never replaces a known one.
pub fn merge(existing: &[Source], identity: &str, score: f64) -> Vec<Source> {
    let mut merged = existing.to_vec();
    match merged.iter_mut().find(|s| s.identity == identity) {
        Some(known) => {
            if score < known.score || known.score.is_nan() {
                known.score = score;
            }
        }
        None => merged.push(Source::new(identity, score)),
    }
    merged
}
