//! Fluent builder for constructing a [`SimulationWorld`].

use fm_core::{Timestep, WorldConfig};
use fm_formation::AnyFormation;

use crate::world::StepCallback;
use crate::{SimulationWorld, WorldResult};

/// Fluent builder for [`SimulationWorld`].
///
/// | Method            | Default                   |
/// |-------------------|---------------------------|
/// | `.config(c)`      | `WorldConfig::default()`  |
/// | `.start_at(t)`    | `Timestep::ZERO`          |
///
/// # Example
///
/// ```rust,ignore
/// let mut world = WorldBuilder::new()
///     .config(config)
///     .formation(soil)
///     .formation(plants)
///     .callback(|t, formations| println!("{t}: {} formations", formations.len()))
///     .build()?;
/// world.run(100, &mut NoopObserver)?;
/// ```
#[derive(Default)]
pub struct WorldBuilder {
    config:     WorldConfig,
    start:      Timestep,
    formations: Vec<Box<dyn AnyFormation>>,
    callbacks:  Vec<StepCallback>,
}

impl WorldBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: WorldConfig) -> Self {
        self.config = config;
        self
    }

    /// Resume numbering from `timestep` instead of zero.
    pub fn start_at(mut self, timestep: Timestep) -> Self {
        self.start = timestep;
        self
    }

    pub fn formation<F: AnyFormation>(mut self, formation: F) -> Self {
        self.formations.push(Box::new(formation));
        self
    }

    pub fn boxed(mut self, formation: Box<dyn AnyFormation>) -> Self {
        self.formations.push(formation);
        self
    }

    pub fn callback<C>(mut self, callback: C) -> Self
    where
        C: FnMut(Timestep, &[Box<dyn AnyFormation>]) + Send + 'static,
    {
        self.callbacks.push(Box::new(callback));
        self
    }

    /// Validate the configuration and assemble the world.
    pub fn build(self) -> WorldResult<SimulationWorld> {
        let mut world = SimulationWorld::new(self.config)?;
        world.set_timestep(self.start);
        world.add_range(self.formations);
        for callback in self.callbacks {
            world.add_callback(callback);
        }
        Ok(world)
    }
}
