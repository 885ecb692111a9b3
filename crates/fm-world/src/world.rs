//! `SimulationWorld` and its step loop.

use fm_core::{FormationId, Timestep, WorldConfig};
use fm_formation::{AnyFormation, FormationResult, WorldView};
use log::{debug, info, warn};
use rayon::prelude::*;

use crate::{Phase, WorldError, WorldObserver, WorldResult};

/// Callback run after every census, in registration order.
pub type StepCallback = Box<dyn FnMut(Timestep, &[Box<dyn AnyFormation>]) + Send>;

// ── StepSummary ───────────────────────────────────────────────────────────────

/// Counters for one completed step.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StepSummary {
    pub timestep:        Timestep,
    /// Agents across all formations after the census.
    pub agents:          usize,
    /// Transactions turned into settlement mail.
    pub settled:         usize,
    /// Messages delivered, cascades included.
    pub delivered:       usize,
    /// World-level delivery rounds until no formation had mail left.
    pub delivery_rounds: u32,
    /// Formations whose census changed their population.
    pub reshaped:        usize,
}

// ── SimulationWorld ───────────────────────────────────────────────────────────

/// An ordered set of formations driven through the step loop:
///
/// ```text
/// for each step:
///   ① Tick        — every formation ticks (formations in parallel or in
///                   order, per ExecutionMode), then all publish together
///   ② Settle      — recorded transactions become settlement mail; repeated
///                   while any formation still has transactions
///   ③ Deliver     — postboxes drained; repeated while any formation still
///                   has mail, since delivery may mail other formations
///   ④ Census      — births, inserts, and deaths land
///   ⑤ Callbacks   — registered callbacks, then the observer
/// ```
///
/// Every phase is a barrier: no formation starts phase N+1 before all have
/// finished phase N.  A failure in any formation aborts the step; the world
/// is left at the last completed timestep.
///
/// Create via [`WorldBuilder`][crate::WorldBuilder] or [`SimulationWorld::new`].
pub struct SimulationWorld {
    formations: Vec<Box<dyn AnyFormation>>,
    callbacks:  Vec<StepCallback>,
    timestep:   Timestep,
    config:     WorldConfig,
    pool:       Option<rayon::ThreadPool>,
}

impl SimulationWorld {
    /// An empty world.  Builds a dedicated worker pool when
    /// `config.num_threads` is set.
    pub fn new(config: WorldConfig) -> WorldResult<Self> {
        config.validate()?;
        let pool = match config.num_threads {
            Some(n) => Some(rayon::ThreadPoolBuilder::new().num_threads(n).build()?),
            None    => None,
        };
        Ok(Self {
            formations: Vec::new(),
            callbacks:  Vec::new(),
            timestep:   Timestep::ZERO,
            config,
            pool,
        })
    }

    // ── Setup ─────────────────────────────────────────────────────────────

    /// Append a formation; it runs after every formation added before it.
    pub fn add<F: AnyFormation>(&mut self, formation: F) -> FormationId {
        self.add_boxed(Box::new(formation))
    }

    pub fn add_boxed(&mut self, mut formation: Box<dyn AnyFormation>) -> FormationId {
        let id = FormationId(self.formations.len() as u32);
        formation.attach(id);
        debug!("formation `{}` added as {id}", formation.name());
        self.formations.push(formation);
        id
    }

    pub fn add_range<I>(&mut self, formations: I) -> Vec<FormationId>
    where
        I: IntoIterator<Item = Box<dyn AnyFormation>>,
    {
        formations.into_iter().map(|f| self.add_boxed(f)).collect()
    }

    /// Register a callback run after every census.
    pub fn add_callback<C>(&mut self, callback: C)
    where
        C: FnMut(Timestep, &[Box<dyn AnyFormation>]) + Send + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    pub(crate) fn set_timestep(&mut self, timestep: Timestep) {
        self.timestep = timestep;
    }

    // ── Accessors ─────────────────────────────────────────────────────────

    /// The step the next call to [`step`](Self::step) will run.
    pub fn timestep(&self) -> Timestep {
        self.timestep
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn formations(&self) -> &[Box<dyn AnyFormation>] {
        &self.formations
    }

    pub fn len(&self) -> usize {
        self.formations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formations.is_empty()
    }

    /// Read-only view at the current timestep.
    pub fn view(&self) -> WorldView<'_> {
        WorldView::new(&self.formations, self.timestep, self.config.seed)
    }

    /// The formation at `id`, downcast to its concrete type.
    pub fn get<F: AnyFormation>(&self, id: FormationId) -> Option<&F> {
        self.view().get_as::<F>(id)
    }

    /// First formation of concrete type `F`.
    pub fn find<F: AnyFormation>(&self) -> Option<&F> {
        self.view().find::<F>()
    }

    /// Total agents across all formations.
    pub fn agent_count(&self) -> usize {
        self.formations.iter().map(|f| f.len()).sum()
    }

    /// `true` while any formation has agents or pending arrivals.
    pub fn is_alive(&self) -> bool {
        self.formations.iter().any(|f| f.is_alive())
    }

    fn threads(&self) -> usize {
        self.pool
            .as_ref()
            .map_or_else(rayon::current_num_threads, |p| p.current_num_threads())
    }

    // ── Running ───────────────────────────────────────────────────────────

    /// Run `steps` consecutive steps.
    pub fn run<O: WorldObserver>(&mut self, steps: u64, observer: &mut O) -> WorldResult<()> {
        info!(
            "running {steps} steps from {} across {} formations ({} agents)",
            self.timestep,
            self.formations.len(),
            self.agent_count()
        );
        for _ in 0..steps {
            self.step(observer)?;
        }
        observer.on_run_end(self.timestep);
        info!("run finished at {} with {} agents", self.timestep, self.agent_count());
        Ok(())
    }

    /// Run one full step and advance the timestep.
    pub fn step<O: WorldObserver>(&mut self, observer: &mut O) -> WorldResult<StepSummary> {
        let now = self.timestep;
        observer.on_step_start(now);

        let parallel = self
            .config
            .mode
            .is_parallel(self.formations.len(), self.threads());
        let phases = Phases {
            formations: &self.formations,
            now,
            seed: self.config.seed,
            parallel,
            max_rounds: self.config.max_cascade_rounds,
        };
        let summary = match &self.pool {
            Some(pool) => pool.install(|| phases.run())?,
            None       => phases.run()?,
        };

        for callback in &mut self.callbacks {
            callback(now, self.formations.as_slice());
        }
        observer.on_step_end(&summary, &self.formations);

        self.timestep = now.next();
        Ok(summary)
    }
}

// ── Phases ────────────────────────────────────────────────────────────────────

/// Everything one step needs, borrowed so it can move onto the pool.
struct Phases<'a> {
    formations: &'a [Box<dyn AnyFormation>],
    now:        Timestep,
    seed:       u64,
    parallel:   bool,
    max_rounds: u32,
}

impl Phases<'_> {
    fn run(&self) -> WorldResult<StepSummary> {
        let view = WorldView::new(self.formations, self.now, self.seed);
        let mut summary = StepSummary { timestep: self.now, ..StepSummary::default() };

        // ── ① Tick ────────────────────────────────────────────────────────
        self.each(Phase::Tick, |f| f.tick(&view, self.now).map(|_| 0))?;
        for f in self.formations {
            f.publish_tick();
        }

        // ── ② Settle ──────────────────────────────────────────────────────
        self.cascade(
            Phase::SettleTransactions,
            |f| f.has_unprocessed_transactions(),
            |f| f.process_transactions(),
            |n, _| summary.settled += n,
        )?;

        // ── ③ Deliver ─────────────────────────────────────────────────────
        // Always at least one round: it also commits the tick.
        let mut delivered = 0;
        let rounds = self.cascade(
            Phase::DeliverPost,
            |f| f.has_undelivered_post(),
            |f| f.deliver_post(&view, self.now).map(|d| d.items),
            |n, _| delivered += n,
        )?;
        summary.delivered = delivered;
        summary.delivery_rounds = rounds;

        // ── ④ Census ──────────────────────────────────────────────────────
        summary.reshaped = self.each(Phase::Census, |f| Ok(f.census()?.changed as usize))?;
        summary.agents = self.formations.iter().map(|f| f.len()).sum();

        debug!(
            "{}: settled {}, delivered {} in {} rounds, {} formations reshaped, {} agents",
            self.now,
            summary.settled,
            summary.delivered,
            summary.delivery_rounds,
            summary.reshaped,
            summary.agents
        );
        Ok(summary)
    }

    /// Run `op` on every formation and sum what it returns.
    fn each<F>(&self, phase: Phase, op: F) -> WorldResult<usize>
    where
        F: Fn(&dyn AnyFormation) -> FormationResult<usize> + Sync + Send,
    {
        let run = |f: &Box<dyn AnyFormation>| op(f.as_ref()).map_err(|e| self.fail(f.as_ref(), phase, e));
        if self.parallel {
            self.formations
                .par_iter()
                .map(run)
                .try_reduce(|| 0, |a, b| Ok(a + b))
        } else {
            self.formations.iter().map(run).sum()
        }
    }

    /// Run rounds of `op` until no formation reports `pending`.  The first
    /// round always runs.  Returns the number of rounds.
    fn cascade<P, F, A>(&self, phase: Phase, pending: P, op: F, mut tally: A) -> WorldResult<u32>
    where
        P: Fn(&dyn AnyFormation) -> bool,
        F: Fn(&dyn AnyFormation) -> FormationResult<usize> + Sync + Send,
        A: FnMut(usize, u32),
    {
        let mut rounds = 0;
        loop {
            if rounds == self.max_rounds {
                return Err(WorldError::CascadeLimit { phase, timestep: self.now, rounds });
            }
            rounds += 1;
            let done = self.each(phase, &op)?;
            tally(done, rounds);

            if !self.formations.iter().any(|f| pending(f.as_ref())) {
                return Ok(rounds);
            }
            if rounds == self.max_rounds / 2 {
                warn!(
                    "{}: {phase} still cascading after {rounds} of {} rounds",
                    self.now, self.max_rounds
                );
            }
        }
    }

    fn fail(&self, formation: &dyn AnyFormation, phase: Phase, source: fm_formation::FormationError) -> WorldError {
        WorldError::Formation {
            formation:      formation.name().to_owned(),
            phase,
            timestep:       self.now,
            last_completed: self.now.previous(),
            source,
        }
    }
}
