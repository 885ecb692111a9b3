//! The capability contracts agent records implement.

use fm_core::{AgentIndex, Substance, Timestep};
use fm_post::TransactionKind;

use crate::{Formation, FormationTree, WorldView};

/// Any value stored in a formation.
///
/// Agents are plain values: no pointers to each other, only [`AgentIndex`]es
/// into the owning formation's array.  `settle` receives transaction
/// settlements; populations that never transact can rely on the no-op
/// default.
pub trait Ledger: Clone + Send + Sync + 'static {
    /// Apply one side of a settled transaction.
    ///
    /// Within a delivery round every `Increase` lands before any `Decrease`,
    /// so an implementation that clamps at zero sees the full balance.
    fn settle(&mut self, _substance: Substance, _amount: f32, _kind: TransactionKind) {}
}

/// A member of a flat [`Formation`].
///
/// `tick` runs once per timestep on a private copy of the agent (the slot in
/// the working array) and may run in parallel with every other agent of the
/// formation.  It may read the committed state of its own and other
/// formations, and may request structural changes or send mail through
/// `formation`.  Those requests only take effect later; nothing here can
/// write another agent's slot.
///
/// A recoverable condition (starvation, …) should be expressed by mutating
/// `self` into a terminal state and calling [`Formation::death`].  Panics
/// propagate and abort the run.
pub trait Agent: Ledger {
    fn tick(
        &mut self,
        world:     &WorldView<'_>,
        formation: &Formation<Self>,
        index:     AgentIndex,
        timestep:  Timestep,
    );
}

/// Proof that the caller is the census.  Only this crate can make one, which
/// restricts [`TreeAgent::census_update_parent`] to census code.
pub struct CensusToken {
    _private: (),
}

impl CensusToken {
    pub(crate) fn new() -> Self {
        Self { _private: () }
    }
}

/// A member of a hierarchical [`FormationTree`].
///
/// The parent link lives inside the record.  Agents read it through
/// [`parent`](Self::parent); only the census rewrites it.
pub trait TreeAgent: Ledger {
    fn tick(
        &mut self,
        world:     &WorldView<'_>,
        formation: &FormationTree<Self>,
        index:     AgentIndex,
        timestep:  Timestep,
    );

    /// Index of this agent's parent in the current array, `None` for a root.
    fn parent(&self) -> Option<AgentIndex>;

    /// Overwrite the parent link after the census relabels the array.
    fn census_update_parent(&mut self, parent: Option<AgentIndex>, token: CensusToken);
}
