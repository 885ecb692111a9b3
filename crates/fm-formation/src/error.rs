//! Invariant violations raised by formations.
//!
//! Nothing here is recoverable.  A domain condition such as an agent running
//! out of a resource is the agent's own business (it clamps or requests its
//! death); these variants mean the engine was driven with inconsistent
//! indices and the step must abort.

use fm_core::{AgentIndex, CoreError};
use fm_post::PostError;
use thiserror::Error;

use crate::PendingAgent;

#[derive(Debug, Error)]
pub enum FormationError {
    #[error("death requested for {index} but the formation holds {len} agents")]
    DeathOutOfRange { index: AgentIndex, len: usize },

    #[error("message addressed to {index} but the formation holds {len} agents")]
    RecipientOutOfRange { index: AgentIndex, len: usize },

    #[error("transaction references {index} but the formation holds {len} agents")]
    TransactionOutOfRange { index: AgentIndex, len: usize },

    #[error("agent {child} names parent {parent} but the formation holds {len} agents")]
    ParentOutOfRange { child: AgentIndex, parent: AgentIndex, len: usize },

    #[error("agent {index} is not reachable from any root (parent cycle)")]
    ParentCycle { index: AgentIndex },

    #[error("insert references unknown pending agent {handle:?}")]
    UnknownPending { handle: PendingAgent },

    #[error("parent {parent} of surviving agent {child} has no entry in the index map")]
    UnmappedParent { child: AgentIndex, parent: AgentIndex },

    #[error("index map covers {map} agents but the census started from {agents}")]
    MalformedIndexMap { map: usize, agents: usize },

    #[error("tree cache covers {cache} agents but the formation holds {agents}")]
    CacheOutOfSync { cache: usize, agents: usize },

    #[error("{phase} requested on `{formation}` while its agents are ticking")]
    PhaseDuringTick { formation: String, phase: &'static str },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Post(#[from] PostError),
}

pub type FormationResult<T> = Result<T, FormationError>;
