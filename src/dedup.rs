use std::collections::HashSet;

use crate::records::MatchRecord;

/// Candidates whose match id is not yet persisted, in listing order.
pub fn filter_unseen(candidates: &[MatchRecord], persisted: &HashSet<String>) -> Vec<MatchRecord> {
    candidates
        .iter()
        .filter(|m| !persisted.contains(&m.match_id))
        .cloned()
        .collect()
}

/// Keeps the earliest `cap` matches when a per-run bound is set.
pub fn apply_cap(mut matches: Vec<MatchRecord>, cap: Option<usize>) -> Vec<MatchRecord> {
    if let Some(cap) = cap {
        matches.truncate(cap);
    }
    matches
}
