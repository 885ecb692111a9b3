//! Deterministic per-agent and world-level RNG wrappers.
//!
//! # Determinism strategy
//!
//! Agents tick in parallel, so they cannot share one RNG stream without
//! making results depend on thread scheduling.  Instead every agent derives
//! a fresh `SmallRng` for each step from:
//!
//!   seed = world_seed XOR (index * MIXING) XOR (timestep * MIXING_STEP)
//!
//! Agent indices are relabelled by Census, so the stream is tied to the
//! position an agent occupies during that step, which is itself
//! deterministic for a given run.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::{AgentIndex, Timestep};

/// 64-bit fractional golden-ratio constant for seed mixing.
const MIXING_CONSTANT: u64 = 0x9e37_79b9_7f4a_7c15;

/// Second odd constant so index and timestep do not cancel each other out.
const MIXING_STEP: u64 = 0xbf58_476d_1ce4_e5b9;

// ── AgentRng ──────────────────────────────────────────────────────────────────

/// Per-agent, per-step deterministic RNG.
///
/// Built on demand inside `Agent::tick`; never stored in the agent record.
pub struct AgentRng(SmallRng);

impl AgentRng {
    /// Seed from the world seed, the agent's current index, and the timestep.
    pub fn for_step(world_seed: u64, index: AgentIndex, timestep: Timestep) -> Self {
        let seed = world_seed
            ^ (index.0 as u64).wrapping_mul(MIXING_CONSTANT)
            ^ timestep.0.wrapping_mul(MIXING_STEP);
        AgentRng(SmallRng::seed_from_u64(seed))
    }

    /// Expose the inner `SmallRng` for use with `rand` distribution types.
    #[inline]
    pub fn inner(&mut self) -> &mut SmallRng {
        &mut self.0
    }

    /// Sample a uniformly distributed value of any `Standard`-distributed type.
    #[inline]
    pub fn random<T>(&mut self) -> T
    where
        rand::distributions::Standard: rand::distributions::Distribution<T>,
    {
        self.0.r#gen()
    }

    /// Generate a value uniformly in `range`.
    #[inline]
    pub fn gen_range<T, R>(&mut self, range: R) -> T
    where
        T: rand::distributions::uniform::SampleUniform,
        R: rand::distributions::uniform::SampleRange<T>,
    {
        self.0.gen_range(range)
    }

    /// `true` with probability `p` (clamped to [0, 1]).
    #[inline]
    pub fn gen_bool(&mut self, p: f64) -> bool {
        self.0.gen_bool(p.clamp(0.0, 1.0))
    }
}

// ── WorldRng ──────────────────────────────────────────────────────────────────

/// World-level RNG for host-side setup (seeding initial populations, …).
///
/// Used only from single-threaded code between steps.
pub struct WorldRng(SmallRng);

impl WorldRng {
    pub fn new(seed: u64) -> Self {
        WorldRng(SmallRng::seed_from_u64(seed))
    }

    #[inline]
    pub fn inner(&mut self) -> &mut SmallRng {
        &mut self.0
    }

    #[inline]
    pub fn gen_range<T, R>(&mut self, range: R) -> T
    where
        T: rand::distributions::uniform::SampleUniform,
        R: rand::distributions::uniform::SampleRange<T>,
    {
        self.0.gen_range(range)
    }

    #[inline]
    pub fn gen_bool(&mut self, p: f64) -> bool {
        self.0.gen_bool(p.clamp(0.0, 1.0))
    }
}
