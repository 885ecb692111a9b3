//! Message addressing.

use fm_core::AgentIndex;

/// Who a message is delivered to.
///
/// `Only` holds a sorted, duplicate-free list so each recipient receives a
/// message at most once and in ascending index order.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum Recipients {
    /// Every agent of the formation.
    #[default]
    All,
    /// An explicit ordered set of indices.
    Only(Vec<AgentIndex>),
}

impl Recipients {
    /// Exactly one recipient.
    pub fn one(index: AgentIndex) -> Self {
        Recipients::Only(vec![index])
    }

    /// Build an ordered set from any list of indices.
    pub fn only<I: IntoIterator<Item = AgentIndex>>(indices: I) -> Self {
        let mut v: Vec<AgentIndex> = indices.into_iter().collect();
        v.sort_unstable();
        v.dedup();
        Recipients::Only(v)
    }

    #[inline]
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Recipients::All)
    }

    /// `true` if `index` receives the message.
    pub fn includes(&self, index: AgentIndex) -> bool {
        match self {
            Recipients::All => true,
            Recipients::Only(v) => v.binary_search(&index).is_ok(),
        }
    }

    /// Largest explicit recipient, used for range validation.
    pub fn max_index(&self) -> Option<AgentIndex> {
        match self {
            Recipients::All => None,
            Recipients::Only(v) => v.last().copied(),
        }
    }
}
