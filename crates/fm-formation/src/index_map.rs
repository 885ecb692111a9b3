//! Old-index → new-index relabelling produced by a census.

use fm_core::AgentIndex;

/// Dense map from every index of the pre-census array to its new position.
///
/// Removed agents map to nothing.  Survivors keep their relative order, so
/// the map is strictly increasing over the indices it does map.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexMap {
    new_of_old: Vec<AgentIndex>,
}

impl IndexMap {
    /// The map of a census that changed nothing.
    pub fn identity(len: usize) -> Self {
        Self { new_of_old: fm_core::indices(len).collect() }
    }

    pub(crate) fn with_capacity(len: usize) -> Self {
        Self { new_of_old: Vec::with_capacity(len) }
    }

    pub(crate) fn push(&mut self, new: Option<AgentIndex>) {
        self.new_of_old.push(new.unwrap_or(AgentIndex::INVALID));
    }

    /// Number of pre-census indices covered.
    pub fn old_len(&self) -> usize {
        self.new_of_old.len()
    }

    /// New position of `old`, or `None` if that agent was removed (or `old`
    /// was never in range).
    #[inline]
    pub fn get(&self, old: AgentIndex) -> Option<AgentIndex> {
        self.new_of_old
            .get(old.index())
            .copied()
            .filter(|n| n.is_valid())
    }

    /// `(old, new)` pairs for every survivor, ascending.
    pub fn iter(&self) -> impl Iterator<Item = (AgentIndex, AgentIndex)> + '_ {
        self.new_of_old
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_valid())
            .map(|(o, &n)| (AgentIndex(o as u32), n))
    }

    /// Survivor count.
    pub fn survivors(&self) -> usize {
        self.new_of_old.iter().filter(|n| n.is_valid()).count()
    }

    /// `true` if every old index maps to itself.
    pub fn is_identity(&self) -> bool {
        self.new_of_old
            .iter()
            .enumerate()
            .all(|(o, n)| n.index() == o)
    }
}
