//! `fm-world` — step loop orchestrator for the formation simulation engine.
//!
//! # Step loop
//!
//! ```text
//! for step in 0..steps:
//!   ① Tick      — every formation's agents tick; all publish together
//!   ② Settle    — transactions → settlement mail, until none remain
//!   ③ Deliver   — postboxes drained, until no formation has mail
//!   ④ Census    — structural changes land
//!   ⑤ Callbacks — world callbacks, then the observer
//! ```
//!
//! Phases fan out across formations in parallel or in insertion order, per
//! [`ExecutionMode`][fm_core::ExecutionMode].  Both modes reach the same
//! state at the end of each step.
//!
//! # Quick-start
//!
//! ```rust,ignore
//! use fm_formation::Formation;
//! use fm_world::{NoopObserver, WorldBuilder};
//!
//! let mut world = WorldBuilder::new()
//!     .formation(Formation::new("cells", cells))
//!     .build()?;
//! world.run(10, &mut NoopObserver)?;
//! ```

pub mod builder;
pub mod error;
pub mod observer;
pub mod world;


pub use builder::WorldBuilder;
pub use error::{Phase, WorldError, WorldResult};
pub use observer::{NoopObserver, WorldObserver};
pub use world::{SimulationWorld, StepCallback, StepSummary};
