//! Declared-versus-applied tuple arithmetic.

use fgasync_core::resources::Tuple;
use std::collections::HashSet;

/// Remote calls needed to move from the applied set to the declared set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TupleDiff {
    /// Every declared tuple, duplicates removed, in declaration order.
    pub writes: Vec<Tuple>,
    /// Applied tuples that are no longer declared.
    pub deletes: Vec<Tuple>,
}

impl TupleDiff {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.deletes.is_empty()
    }
}

/// Writes are not reduced to the new tuples: every declared tuple is
/// re-sent and duplicates are absorbed, so drift on the remote side heals.
pub fn diff(declared: &[Tuple], managed: &[Tuple]) -> TupleDiff {
    let writes = dedup(declared);
    let wanted: HashSet<&Tuple> = writes.iter().collect();
    let deletes = dedup(managed)
        .into_iter()
        .filter(|t| !wanted.contains(t))
        .collect();
    TupleDiff { writes, deletes }
}

/// Drop repeated tuples, keeping the first occurrence.
pub fn dedup(tuples: &[Tuple]) -> Vec<Tuple> {
    let mut seen = HashSet::with_capacity(tuples.len());
    tuples
        .iter()
        .filter(|t| seen.insert(*t))
        .cloned()
        .collect()
}
