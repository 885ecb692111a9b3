//! Build-time configuration injected into formations and the world.
//!
//! Both structs are resolved once at startup and passed to constructors;
//! nothing in the engine reads global state or feature flags to decide how a
//! phase runs.

use crate::{CoreError, CoreResult};

// ── ExecutionMode ─────────────────────────────────────────────────────────────

/// How the world fans a phase out across its formations.
///
/// Agent-level parallelism inside a formation is controlled separately by
/// [`FormationConfig`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ExecutionMode {
    /// Formations are processed one after another in insertion order.
    /// Steps are reproducible run to run, with or without parallel ticks.
    Sequential,
    /// Formations are processed on the rayon pool.  Structural changes,
    /// transactions, and tick-time mail are still applied in a fixed order.
    /// Mail a message handler sends to another formation may reach it in a
    /// different delivery round from run to run.
    Parallel,
    /// Parallel when the formation count exceeds the pool's thread count,
    /// sequential otherwise.
    #[default]
    Auto,
}

impl ExecutionMode {
    /// Resolve `Auto` against a formation count and pool size.
    #[inline]
    pub fn is_parallel(self, formations: usize, threads: usize) -> bool {
        match self {
            ExecutionMode::Sequential => false,
            ExecutionMode::Parallel   => true,
            ExecutionMode::Auto       => formations > threads,
        }
    }
}

// ── FormationConfig ───────────────────────────────────────────────────────────

/// Per-formation execution settings.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FormationConfig {
    /// Run the agent tick on the rayon pool.  Disable for tiny populations or
    /// when debugging agent code single-threaded.
    pub parallel_tick: bool,

    /// Message delivery switches from a linear pass to an index-parallel scan
    /// once the population exceeds `threads * delivery_agents_per_thread`.
    /// `0` disables the parallel scan entirely.
    pub delivery_agents_per_thread: usize,

    /// Upper bound on drain rounds inside one postbox delivery.  A handler
    /// that keeps mailing its own formation fails the step instead of
    /// spinning forever.
    pub max_delivery_rounds: u32,
}

impl Default for FormationConfig {
    fn default() -> Self {
        Self {
            parallel_tick:              true,
            delivery_agents_per_thread: 256,
            max_delivery_rounds:        1_000,
        }
    }
}

impl FormationConfig {
    /// A configuration that never leaves the calling thread.
    pub fn sequential() -> Self {
        Self {
            parallel_tick:              false,
            delivery_agents_per_thread: 0,
            ..Self::default()
        }
    }

    /// Reject settings a formation cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_delivery_rounds == 0 {
            return Err(CoreError::Config("max_delivery_rounds must be at least 1".into()));
        }
        Ok(())
    }

    /// `true` if a population of `agents` should be delivered to in parallel
    /// on a pool of `threads` workers.
    #[inline]
    pub fn parallel_delivery(&self, agents: usize, threads: usize) -> bool {
        self.delivery_agents_per_thread > 0
            && agents > threads.saturating_mul(self.delivery_agents_per_thread)
    }
}

// ── WorldConfig ───────────────────────────────────────────────────────────────

/// Top-level simulation configuration.
///
/// Typically loaded from a JSON file by the application (enable the `serde`
/// feature) and passed to the world builder.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct WorldConfig {
    /// How phases fan out across formations.
    pub mode: ExecutionMode,

    /// Worker thread count for a dedicated rayon pool.  `None` uses the
    /// global pool (all logical cores).
    pub num_threads: Option<usize>,

    /// Upper bound on settle/deliver rounds within one timestep.  Exceeding
    /// it means messages keep cascading and the step fails.
    pub max_cascade_rounds: u32,

    /// Master seed for per-agent RNG streams.
    pub seed: u64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            mode:               ExecutionMode::Auto,
            num_threads:        None,
            max_cascade_rounds: 1_000,
            seed:               0,
        }
    }
}

impl WorldConfig {
    /// Reject settings the world cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        if self.num_threads == Some(0) {
            return Err(CoreError::Config("num_threads must be at least 1".into()));
        }
        if self.max_cascade_rounds == 0 {
            return Err(CoreError::Config("max_cascade_rounds must be at least 1".into()));
        }
        Ok(())
    }
}
