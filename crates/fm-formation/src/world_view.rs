//! The type-erased formation contract and the read-only world handle given
//! to ticking agents.

use std::any::Any;

use fm_core::{AgentIndex, AgentRng, FormationId, Timestep};
use fm_post::Drained;

use crate::{CensusReport, FormationResult, Ledger, Mailbox};

// ── SnapshotRow ───────────────────────────────────────────────────────────────

/// One agent's structural position, as exported per step.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SnapshotRow {
    pub index:    u32,
    /// `None` for roots and for every agent of a flat formation.
    pub parent:   Option<u32>,
    pub depth:    u32,
    pub children: u32,
}

// ── AnyFormation ──────────────────────────────────────────────────────────────

/// What the world needs from every formation, independent of agent type.
///
/// Phase methods take `&self`: a formation guards its own state, so the
/// world can drive a phase on many formations in parallel.
pub trait AnyFormation: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Told its position when added to a world.  Requests its agents make
    /// are ordered by it.
    fn attach(&mut self, id: FormationId);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Agents exist, or births/inserts are pending.
    fn is_alive(&self) -> bool;

    /// Run every agent's tick into the working array.  Fails if called from
    /// inside one of this formation's own ticks.
    fn tick(&self, world: &WorldView<'_>, timestep: Timestep) -> FormationResult<()>;

    /// Point reads at the tick's results.  Called once every formation has
    /// ticked.
    fn publish_tick(&self);

    /// Queue settlement mail for recorded transactions; returns how many.
    fn process_transactions(&self) -> FormationResult<usize>;

    /// Commit the tick (if not yet committed) and drain the postbox.
    fn deliver_post(&self, world: &WorldView<'_>, timestep: Timestep) -> FormationResult<Drained>;

    /// Apply pending structural changes.
    fn census(&self) -> FormationResult<CensusReport>;

    fn has_unprocessed_transactions(&self) -> bool;

    fn has_undelivered_post(&self) -> bool;

    /// Structural rows for exporters.
    fn snapshot_rows(&self) -> Vec<SnapshotRow>;

    fn as_any(&self) -> &dyn Any;

    /// The formation's `Mailbox<T>`, erased.
    fn mailbox_any(&self) -> &dyn Any;
}

// ── WorldView ─────────────────────────────────────────────────────────────────

/// Read-only view of every formation in the world, plus the current step.
///
/// Handed to `tick` and carried by couriers during delivery.  Formation
/// lookups by type return the first match in insertion order.
#[derive(Copy, Clone)]
pub struct WorldView<'a> {
    formations: &'a [Box<dyn AnyFormation>],
    timestep:   Timestep,
    seed:       u64,
}

impl<'a> WorldView<'a> {
    pub fn new(formations: &'a [Box<dyn AnyFormation>], timestep: Timestep, seed: u64) -> Self {
        Self { formations, timestep, seed }
    }

    /// A view with no other formations, for driving one formation by hand.
    pub fn detached(timestep: Timestep) -> WorldView<'static> {
        WorldView { formations: &[], timestep, seed: 0 }
    }

    pub fn timestep(&self) -> Timestep {
        self.timestep
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn formations(&self) -> &'a [Box<dyn AnyFormation>] {
        self.formations
    }

    pub fn get(&self, id: FormationId) -> Option<&'a dyn AnyFormation> {
        self.formations.get(id.index()).map(|f| f.as_ref())
    }

    pub fn by_name(&self, name: &str) -> Option<&'a dyn AnyFormation> {
        self.formations
            .iter()
            .find(|f| f.name() == name)
            .map(|f| f.as_ref())
    }

    /// Downcast the formation at `id` to its concrete type.
    pub fn get_as<F: AnyFormation>(&self, id: FormationId) -> Option<&'a F> {
        self.get(id)?.as_any().downcast_ref::<F>()
    }

    /// First formation of concrete type `F`.
    pub fn find<F: AnyFormation>(&self) -> Option<&'a F> {
        self.find_all::<F>().next()
    }

    /// Every formation of concrete type `F`.
    pub fn find_all<F: AnyFormation>(&self) -> impl Iterator<Item = &'a F> + use<'a, F> {
        self.formations
            .iter()
            .filter_map(|f| f.as_any().downcast_ref::<F>())
    }

    /// Mailbox of the first formation holding agents of type `U`.
    pub fn mailbox<U: Ledger>(&self) -> Option<&'a Mailbox<U>> {
        self.formations
            .iter()
            .find_map(|f| f.mailbox_any().downcast_ref::<Mailbox<U>>())
    }

    /// Deterministic RNG for the agent at `index` in this step.
    pub fn rng(&self, index: AgentIndex) -> AgentRng {
        AgentRng::for_step(self.seed, index, self.timestep)
    }
}
