//! `fm-formation` — agent populations for the formation simulation engine.
//!
//! # Step phases, per formation
//!
//! ```text
//! tick           — committed array copied into the working array; every
//!                  agent ticks its own working slot (parallel)
//! publish        — reads switch to the working array
//! transactions   — recorded transfers become settlement mail
//! deliver        — working array committed; postbox drained into it,
//!                  Increase messages before the rest in each round
//! census         — births, inserts, and deaths land; array compacted and
//!                  relabelled; tree cache rebuilt
//! ```
//!
//! # What lives here
//!
//! | Module         | Contents                                                |
//! |----------------|---------------------------------------------------------|
//! | [`agent`]      | `Ledger`, `Agent`, `TreeAgent`, `CensusToken`           |
//! | [`population`] | `Population` (double buffer, requests, phases)          |
//! | [`formation`]  | `Formation` (flat)                                      |
//! | [`tree`]       | `FormationTree` (forest with subtree deaths)            |
//! | [`message`]    | `Message`, `Mailbox`, `Courier`                         |
//! | [`census`]     | `PendingAgent`, `Ancestor`, `CensusReport`              |
//! | [`cache`]      | `TreeCache`                                             |
//! | [`index_map`]  | `IndexMap`                                              |
//! | [`origin`]     | `Origin` (request ordering under parallel ticks)        |
//! | [`hooks`]      | `Reindex`, `CensusObserver`                             |
//! | [`world_view`] | `AnyFormation`, `WorldView`, `SnapshotRow`              |
//! | [`error`]      | `FormationError`, `FormationResult`                     |

pub mod agent;
pub mod cache;
pub mod census;
mod delivery;
pub mod error;
pub mod formation;
pub mod hooks;
pub mod index_map;
pub mod message;
pub mod origin;
pub mod population;
pub mod tree;
pub mod world_view;

#[cfg(test)]
mod tests;

// ── Re-exports ────────────────────────────────────────────────────────────────

pub use agent::{Agent, CensusToken, Ledger, TreeAgent};
pub use cache::TreeCache;
pub use census::{Ancestor, CensusReport, PendingAgent};
pub use error::{FormationError, FormationResult};
pub use formation::Formation;
pub use hooks::{CensusObserver, Reindex};
pub use index_map::IndexMap;
pub use message::{Courier, FnMessage, Mailbox, Message, MessageWrapper, message_fn};
pub use origin::Origin;
pub use population::{AgentsView, Population, ReadSide};
pub use tree::FormationTree;
pub use world_view::{AnyFormation, SnapshotRow, WorldView};
