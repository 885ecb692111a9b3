//! Extension points invoked by the census.

use crate::{CensusReport, IndexMap};

/// Rewrites agent-internal indices after a census relabels the array.
///
/// Called with the new array and the map from pre-census indices.  Indices
/// missing from the map belong to removed agents; anything still pointing at
/// one is itself removed or about to be relinked.  Not called when the
/// census only appended agents and every old index kept its place.
pub trait Reindex<T>: Send + Sync {
    fn reindex(&self, agents: &mut [T], map: &IndexMap);
}

impl<T, F> Reindex<T> for F
where
    F: Fn(&mut [T], &IndexMap) + Send + Sync,
{
    fn reindex(&self, agents: &mut [T], map: &IndexMap) {
        self(agents, map)
    }
}

/// Callbacks at the end of every census.
///
/// Both methods default to no-ops so implementors only override what they
/// need.
pub trait CensusObserver<T>: Send + Sync {
    /// Nothing was pending; the array is untouched.
    fn post_census_negative(&self, _agents: &[T]) {}

    /// The array was rebuilt.  `agents` is the newly installed array.
    fn post_census_positive(&self, _agents: &[T], _report: &CensusReport) {}
}
