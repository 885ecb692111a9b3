//! `Population<T>` — the storage and phase machinery shared by flat and
//! hierarchical formations.
//!
//! # Double buffer
//!
//! Two arrays of identical length are kept:
//!
//! - `agents` (committed): what the rest of the world reads while agents
//!   tick, and what mail is delivered into.
//! - `agents_tmp` (working): each agent's slot is rewritten by its own
//!   `tick`.
//!
//! [`ReadSide`] names the array read accessors resolve to.  It moves to
//! `Working` when a tick is published and back to `Committed` once delivery
//! has committed the working array.  Both arrays are replaced whenever the
//! population size changes.
//!
//! A finished tick is not published straight away: while other formations
//! are still ticking they must keep seeing this one's committed state, so
//! the world publishes every formation together once the tick phase ends.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use fm_core::{AgentIndex, FormationConfig, FormationId, Substance, Timestep};
use fm_post::{Drained, TransactionKind, TransactionsBox};
use log::{debug, trace};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use rayon::prelude::*;

use crate::census::{
    Compacted, PendingBirth, PendingInsert, Placement, compact, death_closure, filter_orphans,
};
use crate::delivery::deliver_batch;
use crate::message::Settlement;
use crate::origin::{self, Origin, acting_as, placement};
use crate::{
    Ancestor, CensusObserver, CensusReport, Courier, FormationError, FormationResult, Ledger,
    Mailbox, Message, PendingAgent, Reindex, TreeCache, WorldView,
};

// ── ReadSide ──────────────────────────────────────────────────────────────────

/// Which array read accessors currently resolve to.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ReadSide {
    /// The committed array: outside a step, during a tick, after delivery.
    Committed,
    /// The working array: between the end of a tick and its delivery.
    Working,
}

/// Internal buffer state.  `Ticked` reads like `Committed` but the working
/// array holds fresh results that delivery must commit.
const COMMITTED: u8 = 0;
const TICKED: u8 = 1;
const WORKING: u8 = 2;

// ── AgentsView ────────────────────────────────────────────────────────────────

/// Read guard over one of the two arrays.  Dereferences to `[T]`.
pub struct AgentsView<'a, T>(RwLockReadGuard<'a, Vec<T>>);

impl<T> std::ops::Deref for AgentsView<'_, T> {
    type Target = [T];
    fn deref(&self) -> &[T] {
        &self.0
    }
}

// ── Population ────────────────────────────────────────────────────────────────

/// Shared core of [`Formation`][crate::Formation] and
/// [`FormationTree`][crate::FormationTree].
pub struct Population<T: Ledger> {
    name:            String,
    id:              FormationId,
    config:          FormationConfig,
    agents:          RwLock<Vec<T>>,
    agents_tmp:      RwLock<Vec<T>>,
    phase:           AtomicU8,
    ticking:         AtomicBool,
    mailbox:         Mailbox<T>,
    births:          Mutex<Vec<PendingBirth<T>>>,
    deaths:          Mutex<Vec<AgentIndex>>,
    transactions:    Mutex<TransactionsBox>,
    host_seq:        AtomicU64,
    reindex:         Option<Box<dyn Reindex<T>>>,
    observer:        Option<Box<dyn CensusObserver<T>>>,
}

impl<T: Ledger> Population<T> {
    pub(crate) fn new(name: String, agents: Vec<T>) -> Self {
        let agents_tmp = agents.clone();
        Self {
            name,
            id:              FormationId::INVALID,
            config:          FormationConfig::default(),
            agents:          RwLock::new(agents),
            agents_tmp:      RwLock::new(agents_tmp),
            phase:           AtomicU8::new(COMMITTED),
            ticking:         AtomicBool::new(false),
            mailbox:         Mailbox::new(),
            births:          Mutex::new(Vec::new()),
            deaths:          Mutex::new(Vec::new()),
            transactions:    Mutex::new(TransactionsBox::new()),
            host_seq:        AtomicU64::new(0),
            reindex:         None,
            observer:        None,
        }
    }

    /// Record the position the world gave this formation.  Requests made by
    /// its agents are ordered by it.
    pub(crate) fn set_id(&mut self, id: FormationId) {
        self.id = id;
    }

    pub(crate) fn set_config(&mut self, config: FormationConfig) {
        self.config = config;
    }

    pub(crate) fn set_reindex(&mut self, reindex: Box<dyn Reindex<T>>) {
        self.reindex = Some(reindex);
    }

    pub(crate) fn set_observer(&mut self, observer: Box<dyn CensusObserver<T>>) {
        self.observer = Some(observer);
    }

    // ── Read access ───────────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position in the world, `FormationId::INVALID` until added to one.
    pub fn id(&self) -> FormationId {
        self.id
    }

    pub fn config(&self) -> &FormationConfig {
        &self.config
    }

    pub fn read_side(&self) -> ReadSide {
        match self.phase.load(Ordering::Acquire) {
            WORKING => ReadSide::Working,
            _       => ReadSide::Committed,
        }
    }

    /// `true` between a tick and the delivery that commits it.
    pub fn has_uncommitted_tick(&self) -> bool {
        self.phase.load(Ordering::Acquire) != COMMITTED
    }

    fn array(&self, side: ReadSide) -> &RwLock<Vec<T>> {
        match side {
            ReadSide::Committed => &self.agents,
            ReadSide::Working   => &self.agents_tmp,
        }
    }

    /// The array that is currently authoritative for reads.
    ///
    /// Safe to call from inside an agent's own `tick`: the tick holds the
    /// committed array for reading only, and reads are recursive.
    pub fn view(&self) -> AgentsView<'_, T> {
        AgentsView(self.array(self.read_side()).read_recursive())
    }

    /// The committed array regardless of the read side.
    pub fn committed(&self) -> AgentsView<'_, T> {
        AgentsView(self.agents.read_recursive())
    }

    /// Clone of the agent at `index` in the authoritative array.
    pub fn get(&self, index: AgentIndex) -> Option<T> {
        self.view().get(index.index()).cloned()
    }

    /// Population size (both arrays always agree).
    pub fn len(&self) -> usize {
        self.view().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Owned copy of the authoritative array.
    pub fn snapshot(&self) -> Vec<T> {
        self.view().to_vec()
    }

    // ── Requests (usable from inside a tick) ──────────────────────────────

    /// Request a new agent; it joins the array at the next census.
    ///
    /// New agents are placed by requester: in index order of the agents that
    /// asked, then in the order each agent asked, then host requests.
    pub fn birth(&self, agent: T) -> PendingAgent {
        let origin = self.stamp();
        let mut births = self.births.lock();
        births.push(PendingBirth { origin, agent });
        PendingAgent::Born((births.len() - 1) as u32)
    }

    /// Request removal of the agent at `index` at the next census.
    ///
    /// Requesting the same index twice is harmless.  An out-of-range index
    /// fails the census.
    pub fn death(&self, index: AgentIndex) {
        self.deaths.lock().push(index);
    }

    /// Broadcast to every agent of this formation.
    pub fn send<M: Message<T>>(&self, message: M) {
        self.mailbox.send(message);
    }

    /// Address one agent of this formation.
    pub fn send_to<M: Message<T>>(&self, index: AgentIndex, message: M) {
        self.mailbox.send_to(index, message);
    }

    /// Address a set of agents of this formation.
    pub fn send_to_many<M, I>(&self, indices: I, message: M)
    where
        M: Message<T>,
        I: IntoIterator<Item = AgentIndex>,
    {
        self.mailbox.send_to_many(indices, message);
    }

    /// Record a transfer of `amount` of `substance` from `src` to `dst`.
    pub fn transact(&self, substance: Substance, src: AgentIndex, dst: AgentIndex, amount: f32) {
        let order = self.stamp().key();
        self.transactions
            .lock()
            .add_ordered(substance, src, dst, amount, order);
    }

    /// Ordering stamp for a request arriving now.
    pub(crate) fn stamp(&self) -> Origin {
        origin::stamp(&self.host_seq)
    }

    /// Fail with `phase` if this formation's agents are mid-tick.  Every phase
    /// takes a lock the tick holds, so running one from inside an agent's
    /// tick would never return.
    pub(crate) fn ensure_idle(&self, phase: &'static str) -> FormationResult<()> {
        if self.ticking.load(Ordering::Acquire) {
            return Err(FormationError::PhaseDuringTick { formation: self.name.clone(), phase });
        }
        Ok(())
    }

    pub fn mailbox(&self) -> &Mailbox<T> {
        &self.mailbox
    }

    pub fn pending_births(&self) -> usize {
        self.births.lock().len()
    }

    pub fn pending_deaths(&self) -> usize {
        self.deaths.lock().len()
    }

    pub fn has_undelivered_post(&self) -> bool {
        !self.mailbox.is_empty()
    }

    pub fn has_unprocessed_transactions(&self) -> bool {
        !self.transactions.lock().is_empty()
    }

    pub(crate) fn has_pending_births_or_deaths(&self) -> bool {
        !self.births.lock().is_empty() || !self.deaths.lock().is_empty()
    }

    // ── Phases ────────────────────────────────────────────────────────────

    /// Make the working array the committed one.  No-op unless a tick is
    /// waiting to be committed.
    ///
    /// The arrays are swapped rather than copied: the stale array left in
    /// the working slot is overwritten by the next tick before it is read.
    pub(crate) fn commit(&self) {
        if self.has_uncommitted_tick() {
            let mut committed = self.agents.write();
            let mut working = self.agents_tmp.write();
            std::mem::swap(&mut *committed, &mut *working);
            drop((committed, working));
            self.phase.store(COMMITTED, Ordering::Release);
        }
    }

    /// Point reads at the working array.  No-op unless a tick finished.
    pub(crate) fn publish_tick(&self) {
        let _ = self
            .phase
            .compare_exchange(TICKED, WORKING, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Snapshot the committed array into the working one and run `f` once
    /// per slot, each call owning exactly that slot.  Reads keep resolving
    /// to the committed array until [`publish_tick`](Self::publish_tick).
    ///
    /// Requests an agent makes are stamped with its index.
    pub(crate) fn run_tick<F>(&self, f: F) -> FormationResult<()>
    where
        F: Fn(&mut T, AgentIndex) + Sync + Send,
    {
        self.ensure_idle("tick")?;
        self.commit();

        let committed = self.agents.read_recursive();
        let mut working = self.agents_tmp.write();
        working.clone_from(&committed);

        self.ticking.store(true, Ordering::Release);
        let id = self.id;
        let run = |(i, agent): (usize, &mut T)| {
            let index = AgentIndex(i as u32);
            acting_as(id, index, || f(agent, index));
        };
        if self.config.parallel_tick {
            working.par_iter_mut().enumerate().for_each(run);
        } else {
            working.iter_mut().enumerate().for_each(run);
        }
        self.ticking.store(false, Ordering::Release);
        debug_assert_eq!(working.len(), committed.len());

        drop(working);
        drop(committed);
        self.phase.store(TICKED, Ordering::Release);
        Ok(())
    }

    /// Turn recorded transactions into settlement mail: a `Decrease` for the
    /// source and an `Increase` for the destination of each transfer.
    ///
    /// Returns the number of transactions settled.
    pub fn process_transactions(&self) -> FormationResult<usize> {
        self.ensure_idle("process_transactions")?;
        let batches = self.transactions.lock().drain();
        if batches.is_empty() {
            return Ok(0);
        }
        let len = self.len();
        let mut settled = 0;
        for (substance, txs) in batches {
            for tx in txs {
                for index in [tx.src, tx.dst] {
                    if index.index() >= len {
                        return Err(FormationError::TransactionOutOfRange { index, len });
                    }
                }
                self.mailbox.send_to(
                    tx.src,
                    Settlement { substance, amount: tx.amount, side: TransactionKind::Decrease },
                );
                self.mailbox.send_to(
                    tx.dst,
                    Settlement { substance, amount: tx.amount, side: TransactionKind::Increase },
                );
                settled += 1;
            }
        }
        trace!("{}: {settled} transactions queued for settlement", self.name);
        Ok(settled)
    }

    /// Commit the tick's results, then drain the postbox into the committed
    /// array.
    pub(crate) fn deliver(&self, world: &WorldView<'_>, timestep: Timestep) -> FormationResult<Drained> {
        self.ensure_idle("deliver_post")?;
        self.commit();
        if self.mailbox.is_empty() {
            return Ok(Drained::default());
        }

        let mut agents = self.agents.write();
        let parallel = self
            .config
            .parallel_delivery(agents.len(), rayon::current_num_threads());
        let courier = Courier::new(&self.mailbox, world, timestep);
        let drained = self.mailbox.postbox().process(
            self.config.max_delivery_rounds,
            |batch| deliver_batch(&mut agents, batch, self.id, &courier, parallel),
        )?;
        debug!(
            "{}: delivered {} messages in {} rounds",
            self.name, drained.items, drained.rounds
        );
        Ok(drained)
    }

    // ── Census ────────────────────────────────────────────────────────────

    /// Apply pending births, deaths, and the given inserts.
    ///
    /// `tree` enables subtree death closure; `parent_of` reads a birth's
    /// declared parent.  `relink` runs on the compacted array after the
    /// reindex hook and before it is installed.
    pub(crate) fn run_census<P, R>(
        &self,
        tree:      Option<&TreeCache>,
        inserts:   Vec<PendingInsert<T>>,
        parent_of: P,
        relink:    R,
    ) -> FormationResult<CensusReport>
    where
        P: Fn(&T) -> Option<AgentIndex>,
        R: FnOnce(&mut [T], &CensusReport) -> FormationResult<()>,
    {
        self.ensure_idle("census")?;
        let births = std::mem::take(&mut *self.births.lock());
        let deaths = std::mem::take(&mut *self.deaths.lock());

        // An unpublished tick is newer than the committed array.
        self.publish_tick();
        let side = self.read_side();
        if births.is_empty() && deaths.is_empty() && inserts.is_empty() {
            let agents = self.array(side).read_recursive();
            if let Some(obs) = &self.observer {
                obs.post_census_negative(&agents);
            }
            return Ok(CensusReport::unchanged(agents.len()));
        }

        let mut current = self.array(side).write();
        let old_len = current.len();

        let dead = death_closure(old_len, &deaths, tree)?;
        let birth_parents: Vec<Option<AgentIndex>> = births.iter().map(|b| parent_of(&b.agent)).collect();
        let birth_order = placement(&births.iter().map(|b| b.origin).collect::<Vec<_>>());
        let insert_order = placement(&inserts.iter().map(|p| p.origin).collect::<Vec<_>>());
        let birth_agents: Vec<T> = births.into_iter().map(|b| b.agent).collect();
        let (ancestors, insert_agents): (Vec<Ancestor>, Vec<T>) =
            inserts.into_iter().map(|p| (p.ancestor, p.agent)).unzip();

        // Orphans are decided in request order, where a pending ancestor
        // always precedes its dependants; placement follows origin order.
        let (birth_alive, insert_alive) =
            filter_orphans(old_len, &dead, &birth_parents, &ancestors)?;

        let Compacted { mut agents, index_map, births, inserts } = compact(
            &current,
            &dead,
            (birth_agents, Placement { alive: &birth_alive, order: &birth_order }),
            (insert_agents, Placement { alive: &insert_alive, order: &insert_order }),
        )?;

        if index_map.old_len() != old_len {
            return Err(FormationError::MalformedIndexMap { map: index_map.old_len(), agents: old_len });
        }

        let report = CensusReport {
            changed: true,
            removed: dead.sorted.len(),
            len: agents.len(),
            index_map,
            births,
            inserts,
        };

        // Appending births leaves every old index in place.
        if let Some(hook) = &self.reindex
            && !report.index_map.is_identity()
        {
            hook.reindex(&mut agents, &report.index_map);
        }
        relink(&mut agents, &report)?;

        // Install on the authoritative side; the other side gets a copy so
        // both arrays keep the same length.
        let other = match side {
            ReadSide::Committed => ReadSide::Working,
            ReadSide::Working   => ReadSide::Committed,
        };
        *self.array(other).write() = agents.clone();
        *current = agents;

        debug!(
            "{}: census removed {}, added {}, population {} -> {}",
            self.name,
            report.removed,
            report.len + report.removed - old_len,
            old_len,
            report.len
        );
        if let Some(obs) = &self.observer {
            obs.post_census_positive(&current, &report);
        }
        Ok(report)
    }
}
