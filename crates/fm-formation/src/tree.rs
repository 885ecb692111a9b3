//! `FormationTree<T>` — a population whose agents form a forest.
//!
//! Each agent carries its parent link; the tree shape is mirrored in a
//! [`TreeCache`] rebuilt by every census that changes the array.  Killing a
//! node kills its whole subtree, and [`insert`](FormationTree::insert) hangs
//! a new agent under an existing or pending one.

use std::any::Any;
use std::ops::Deref;

use fm_core::{AgentIndex, FormationConfig, FormationId, Timestep};
use fm_post::Drained;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};

use crate::census::PendingInsert;
use crate::{
    Ancestor, AnyFormation, CensusObserver, CensusReport, CensusToken, FormationError,
    FormationResult, PendingAgent, Population, Reindex, SnapshotRow, TreeAgent, TreeCache,
    WorldView,
};

pub struct FormationTree<T: TreeAgent> {
    pop:     Population<T>,
    inserts: Mutex<Vec<PendingInsert<T>>>,
    cache:   RwLock<TreeCache>,
}

impl<T: TreeAgent> FormationTree<T> {
    /// Build from agents whose parent links already index into `agents`.
    pub fn new(name: impl Into<String>, agents: Vec<T>) -> FormationResult<Self> {
        let cache = TreeCache::build(agents.iter().map(T::parent))?;
        Ok(Self {
            pop:     Population::new(name.into(), agents),
            inserts: Mutex::new(Vec::new()),
            cache:   RwLock::new(cache),
        })
    }

    pub fn with_config(mut self, config: FormationConfig) -> Self {
        self.pop.set_config(config);
        self
    }

    /// Hook rewriting agent-held indices other than the parent link, which
    /// the census maintains itself.
    pub fn with_reindex(mut self, reindex: impl Reindex<T> + 'static) -> Self {
        self.pop.set_reindex(Box::new(reindex));
        self
    }

    pub fn with_observer(mut self, observer: impl CensusObserver<T> + 'static) -> Self {
        self.pop.set_observer(Box::new(observer));
        self
    }

    // ── Structural requests ───────────────────────────────────────────────

    /// Request a new agent as a child of `ancestor`.
    ///
    /// The agent's own parent link is ignored and overwritten by the census.
    /// If the ancestor dies in the same census the insert is dropped.
    pub fn insert(&self, ancestor: impl Into<Ancestor>, agent: T) -> PendingAgent {
        let origin = self.pop.stamp();
        let mut inserts = self.inserts.lock();
        inserts.push(PendingInsert { origin, ancestor: ancestor.into(), agent });
        PendingAgent::Inserted((inserts.len() - 1) as u32)
    }

    pub fn pending_inserts(&self) -> usize {
        self.inserts.lock().len()
    }

    pub fn has_pending_changes(&self) -> bool {
        self.pop.has_pending_births_or_deaths() || !self.inserts.lock().is_empty()
    }

    pub fn is_alive(&self) -> bool {
        !self.pop.is_empty() || self.pop.pending_births() > 0 || self.pending_inserts() > 0
    }

    // ── Phases ────────────────────────────────────────────────────────────
    //
    // Crate-private so agents, which hold `&FormationTree`, cannot drive
    // them.  Outside this crate the world reaches them through
    // `AnyFormation`.

    /// Pending changes are applied before the agents tick.
    fn tick_unpublished(&self, world: &WorldView<'_>, timestep: Timestep) -> FormationResult<()> {
        if self.has_pending_changes() {
            self.census()?;
        }
        self.pop
            .run_tick(|agent, index| agent.tick(world, self, index, timestep))
    }

    pub(crate) fn deliver_post(&self, world: &WorldView<'_>, timestep: Timestep) -> FormationResult<Drained> {
        self.pop.deliver(world, timestep)
    }

    /// Apply pending births, inserts, and deaths (with their subtrees), then
    /// relink parents and rebuild the cache.
    pub(crate) fn census(&self) -> FormationResult<CensusReport> {
        self.pop.ensure_idle("census")?;
        let inserts = std::mem::take(&mut *self.inserts.lock());
        let ancestors: Vec<Ancestor> = inserts.iter().map(|p| p.ancestor).collect();

        let mut rebuilt = None;
        let report = {
            let cache = self.cache.read();
            self.pop.run_census(Some(&*cache), inserts, T::parent, |agents, report| {
                relink(agents, report, &ancestors)?;
                rebuilt = Some(TreeCache::build(agents.iter().map(T::parent))?);
                Ok(())
            })?
        };
        if let Some(cache) = rebuilt {
            *self.cache.write() = cache;
        }
        Ok(report)
    }

    // ── Tree queries ──────────────────────────────────────────────────────

    /// The whole cache, for queries not covered below.
    pub fn cache(&self) -> RwLockReadGuard<'_, TreeCache> {
        self.cache.read_recursive()
    }

    pub fn parent(&self, node: AgentIndex) -> Option<AgentIndex> {
        self.cache().parent(node)
    }

    pub fn children(&self, node: AgentIndex) -> Vec<AgentIndex> {
        self.cache().children(node).to_vec()
    }

    pub fn first_child(&self, node: AgentIndex) -> Option<AgentIndex> {
        self.cache().first_child(node)
    }

    pub fn depth(&self, node: AgentIndex) -> Option<u32> {
        self.cache().depth(node)
    }

    pub fn roots(&self) -> Vec<AgentIndex> {
        self.cache().roots().to_vec()
    }

    pub fn max_depth(&self) -> u32 {
        self.cache().max_depth()
    }

    pub fn is_root(&self, node: AgentIndex) -> bool {
        self.cache().is_root(node)
    }

    pub fn is_leaf(&self, node: AgentIndex) -> bool {
        self.cache().is_leaf(node)
    }

    /// Parent, grandparent, … up to the root.
    pub fn ancestors(&self, node: AgentIndex) -> Vec<AgentIndex> {
        self.cache().ancestors(node).collect()
    }

    /// `node` and every descendant, breadth-first.
    pub fn subtree(&self, node: AgentIndex) -> Vec<AgentIndex> {
        self.cache().subtree(node)
    }

    /// One row per agent describing its place in the tree.
    pub fn tree_snapshot(&self) -> Vec<SnapshotRow> {
        let cache = self.cache();
        (0..cache.len())
            .map(|i| {
                let node = AgentIndex(i as u32);
                SnapshotRow {
                    index:    i as u32,
                    parent:   cache.parent(node).map(|p| p.0),
                    depth:    cache.depth(node).unwrap_or(0),
                    children: cache.children(node).len() as u32,
                }
            })
            .collect()
    }
}

/// Rewrite parent links on the compacted array.
///
/// Survivors and births carry pre-census parent indices and are mapped
/// through the index map; a parent with no entry means the closure missed a
/// descendant.  Each insert is attached to its resolved ancestor.
fn relink<T: TreeAgent>(
    agents:    &mut [T],
    report:    &CensusReport,
    ancestors: &[Ancestor],
) -> FormationResult<()> {
    let mut inserted = vec![false; agents.len()];
    for at in report.inserts.iter().flatten() {
        inserted[at.index()] = true;
    }

    for (i, agent) in agents.iter_mut().enumerate() {
        if inserted[i] {
            continue;
        }
        if let Some(old) = agent.parent() {
            let new = report.index_map.get(old).ok_or(FormationError::UnmappedParent {
                child:  AgentIndex(i as u32),
                parent: old,
            })?;
            agent.census_update_parent(Some(new), CensusToken::new());
        }
    }

    for (slot, &ancestor) in report.inserts.iter().zip(ancestors) {
        let Some(at) = *slot else { continue };
        let parent = report.resolve_ancestor(ancestor).ok_or(match ancestor {
            Ancestor::Existing(old)   => FormationError::UnmappedParent { child: at, parent: old },
            Ancestor::Pending(handle) => FormationError::UnknownPending { handle },
        })?;
        agents[at.index()].census_update_parent(Some(parent), CensusToken::new());
    }
    Ok(())
}

impl<T: TreeAgent> Deref for FormationTree<T> {
    type Target = Population<T>;

    fn deref(&self) -> &Population<T> {
        &self.pop
    }
}

impl<T: TreeAgent> AnyFormation for FormationTree<T> {
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
        FormationTree::is_alive(self)
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
        FormationTree::deliver_post(self, world, timestep)
    }

    fn census(&self) -> FormationResult<CensusReport> {
        FormationTree::census(self)
    }

    fn has_unprocessed_transactions(&self) -> bool {
        self.pop.has_unprocessed_transactions()
    }

    fn has_undelivered_post(&self) -> bool {
        self.pop.has_undelivered_post()
    }

    fn snapshot_rows(&self) -> Vec<SnapshotRow> {
        self.tree_snapshot()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn mailbox_any(&self) -> &dyn Any {
        self.pop.mailbox()
    }
}
