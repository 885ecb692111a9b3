//! `Formation<T>` — a flat population.

use std::any::Any;
use std::ops::Deref;

use fm_core::{FormationConfig, FormationId, Timestep};
use fm_post::Drained;

use crate::{
    Agent, AnyFormation, CensusObserver, CensusReport, FormationResult, Population, Reindex,
    SnapshotRow, WorldView,
};

/// A flat array of agents of one type.
///
/// All the shared machinery (read access, requests, delivery) is on
/// [`Population`], reachable through `Deref`.
pub struct Formation<T: Agent> {
    pop: Population<T>,
}

impl<T: Agent> Formation<T> {
    pub fn new(name: impl Into<String>, agents: Vec<T>) -> Self {
        Self { pop: Population::new(name.into(), agents) }
    }

    pub fn with_config(mut self, config: FormationConfig) -> Self {
        self.pop.set_config(config);
        self
    }

    /// Hook rewriting agent-held indices after a census relabels the array.
    pub fn with_reindex(mut self, reindex: impl Reindex<T> + 'static) -> Self {
        self.pop.set_reindex(Box::new(reindex));
        self
    }

    pub fn with_observer(mut self, observer: impl CensusObserver<T> + 'static) -> Self {
        self.pop.set_observer(Box::new(observer));
        self
    }

    /// `true` if the next census has anything to apply.
    pub fn has_pending_changes(&self) -> bool {
        self.pop.has_pending_births_or_deaths()
    }

    pub fn is_alive(&self) -> bool {
        !self.pop.is_empty() || self.pop.pending_births() > 0
    }

    // Phase entry points are crate-private: agents hold `&Formation` during
    // their tick.  The world drives them through `AnyFormation`.

    /// Births and deaths requested outside the step (before the first tick,
    /// say) are applied first so every agent ticks at its final index.
    fn tick_unpublished(&self, world: &WorldView<'_>, timestep: Timestep) -> FormationResult<()> {
        if self.has_pending_changes() {
            self.census()?;
        }
        self.pop
            .run_tick(|agent, index| agent.tick(world, self, index, timestep))
    }

    /// Commit the tick and deliver all queued mail.
    pub(crate) fn deliver_post(&self, world: &WorldView<'_>, timestep: Timestep) -> FormationResult<Drained> {
        self.pop.deliver(world, timestep)
    }

    /// Apply pending births and deaths.
    pub(crate) fn census(&self) -> FormationResult<CensusReport> {
        self.pop.run_census(None, Vec::new(), |_| None, |_, _| Ok(()))
    }
}

impl<T: Agent> Deref for Formation<T> {
    type Target = Population<T>;

    fn deref(&self) -> &Population<T> {
        &self.pop
    }
}

impl<T: Agent> AnyFormation for Formation<T> {
    fn name(&self) -> &str {
        self.pop.name()
    }

    fn attach(&mut self, id: FormationId) {
        self.pop.set_id(id);
    }

    fn len(&self) -> usize {
        self.pop.len()
    }

    fn is_alive(&self) -> bool {
        Formation::is_alive(self)
    }

    fn tick(&self, world: &WorldView<'_>, timestep: Timestep) -> FormationResult<()> {
        self.tick_unpublished(world, timestep)
    }

    fn publish_tick(&self) {
        self.pop.publish_tick();
    }

    fn process_transactions(&self) -> FormationResult<usize> {
        self.pop.process_transactions()
    }

    fn deliver_post(&self, world: &WorldView<'_>, timestep: Timestep) -> FormationResult<Drained> {
        Formation::deliver_post(self, world, timestep)
    }

    fn census(&self) -> FormationResult<CensusReport> {
        Formation::census(self)
    }

    fn has_unprocessed_transactions(&self) -> bool {
        self.pop.has_unprocessed_transactions()
    }

    fn has_undelivered_post(&self) -> bool {
        self.pop.has_undelivered_post()
    }

    fn snapshot_rows(&self) -> Vec<SnapshotRow> {
        (0..self.pop.len() as u32)
            .map(|index| SnapshotRow { index, parent: None, depth: 0, children: 0 })
            .collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn mailbox_any(&self) -> &dyn Any {
        self.pop.mailbox()
    }
}
