//! Hooks for progress reporting and data collection around each step.

use fm_core::Timestep;
use fm_formation::AnyFormation;

use crate::StepSummary;

/// Callbacks invoked by [`SimulationWorld::run`][crate::SimulationWorld::run].
///
/// All methods have default no-op implementations so implementors only need
/// to override what they care about.
///
/// # Example — progress printer
///
/// ```rust,ignore
/// struct Progress { every: u64 }
///
/// impl WorldObserver for Progress {
///     fn on_step_end(&mut self, summary: &StepSummary, _f: &[Box<dyn AnyFormation>]) {
///         if summary.timestep.0 % self.every == 0 {
///             println!("{}: {} agents", summary.timestep, summary.agents);
///         }
///     }
/// }
/// ```
pub trait WorldObserver {
    /// Before the tick phase of `timestep`.
    fn on_step_start(&mut self, _timestep: Timestep) {}

    /// After the census and the world's own callbacks.  Formations hold the
    /// step's final, committed state.
    fn on_step_end(&mut self, _summary: &StepSummary, _formations: &[Box<dyn AnyFormation>]) {}

    /// Once after the last step of a `run`.
    fn on_run_end(&mut self, _next: Timestep) {}
}

/// A [`WorldObserver`] that does nothing.
pub struct NoopObserver;

impl WorldObserver for NoopObserver {}
