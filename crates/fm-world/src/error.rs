use std::fmt;

use fm_core::{CoreError, Timestep};
use fm_formation::FormationError;
use thiserror::Error;

/// Stage of the step loop a failure happened in.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Phase {
    Tick,
    SettleTransactions,
    DeliverPost,
    Census,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Tick               => "tick",
            Phase::SettleTransactions => "transaction settlement",
            Phase::DeliverPost        => "post delivery",
            Phase::Census             => "census",
        })
    }
}

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("world configuration error: {0}")]
    Config(#[from] CoreError),

    #[error("could not build the worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error(
        "formation `{formation}` failed during {phase} of {timestep} \
         (last completed step: {last_completed:?}): {source}"
    )]
    Formation {
        formation:      String,
        phase:          Phase,
        timestep:       Timestep,
        last_completed: Option<Timestep>,
        #[source]
        source:         FormationError,
    },

    #[error("{phase} of {timestep} still had pending work after {rounds} rounds")]
    CascadeLimit {
        phase:    Phase,
        timestep: Timestep,
        rounds:   u32,
    },
}

pub type WorldResult<T> = Result<T, WorldError>;
