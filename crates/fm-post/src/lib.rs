//! `fm-post` — the message plumbing underneath every formation.
//!
//! This crate knows nothing about agents.  It provides the containers that a
//! formation fills while its agents tick and drains afterwards:
//!
//! | Module            | Contents                                                   |
//! |-------------------|------------------------------------------------------------|
//! | [`postbox`]       | `PostBox<M>` — double buffer with a swap-then-drain loop   |
//! | [`kind`]          | `MessageKind`, `Ordered`, increase-first partitioning      |
//! | [`recipients`]    | `Recipients` — broadcast or a sorted set of indices        |
//! | [`transaction`]   | `Transaction`, `TransactionKind`, `TransactionsBox`        |
//! | [`error`]         | `PostError`, `PostResult<T>`                               |
//!
//! # Buffer discipline
//!
//! Producers always append to the buffer that is *not* being drained.  A
//! drain flips the active buffer before it takes the old one, so anything a
//! message handler sends while the batch is being applied lands in the other
//! buffer and is picked up by the next round of the same drain.

pub mod error;
pub mod kind;
pub mod postbox;
pub mod recipients;
pub mod transaction;


pub use error::{PostError, PostResult};
pub use kind::{MessageKind, Ordered, increase_first};
pub use postbox::{Drained, PostBox};
pub use recipients::Recipients;
pub use transaction::{Transaction, TransactionKind, TransactionsBox};
