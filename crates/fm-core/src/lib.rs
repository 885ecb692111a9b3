//! `fm-core` — foundational types for the formation simulation engine.
//!
//! This crate is a dependency of every other `fm-*` crate.  It has no
//! `fm-*` dependencies and only `rand` and `thiserror` (plus optional
//! `serde`) as external ones.
//!
//! # What lives here
//!
//! | Module      | Contents                                                   |
//! |-------------|------------------------------------------------------------|
//! | [`ids`]     | `AgentIndex`, `FormationId`, `Substance`                   |
//! | [`time`]    | `Timestep`                                                 |
//! | [`config`]  | `FormationConfig`, `WorldConfig`, `ExecutionMode`          |
//! | [`rng`]     | `AgentRng` (per agent, per step), `WorldRng` (global)      |
//! | [`error`]   | `CoreError`, `CoreResult`                                  |
//!
//! # Feature flags
//!
//! | Flag    | Effect                                                     |
//! |---------|------------------------------------------------------------|
//! | `serde` | Adds `Serialize`/`Deserialize` to ids, timesteps, configs. |

pub mod config;
pub mod error;
pub mod ids;
pub mod rng;
pub mod time;


// ── Re-exports ────────────────────────────────────────────────────────────────

pub use config::{ExecutionMode, FormationConfig, WorldConfig};
pub use error::{CoreError, CoreResult};
pub use ids::{AgentIndex, FormationId, Substance, indices};
pub use rng::{AgentRng, WorldRng};
pub use time::Timestep;
