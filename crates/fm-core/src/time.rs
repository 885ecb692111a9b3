//! Simulation time model.
//!
//! Time is a monotonically increasing [`Timestep`] counter.  One timestep is
//! one full cycle of the world's phase machine:
//!
//! ```text
//! Tick → SettleTransactions → DeliverPost → Census → Callbacks
//! ```
//!
//! The engine attaches no wall-clock meaning to a timestep; applications that
//! need one scale it themselves.

use std::fmt;

/// An absolute simulation timestep.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Timestep(pub u64);

impl Timestep {
    pub const ZERO: Timestep = Timestep(0);

    /// Return the timestep `n` steps after `self`.
    #[inline]
    pub fn offset(self, n: u64) -> Timestep {
        Timestep(self.0 + n)
    }

    /// The following timestep.
    #[inline]
    pub fn next(self) -> Timestep {
        Timestep(self.0 + 1)
    }

    /// The timestep before `self`, or `None` at zero.
    #[inline]
    pub fn previous(self) -> Option<Timestep> {
        self.0.checked_sub(1).map(Timestep)
    }

    /// Steps elapsed from `earlier` to `self`.
    ///
    /// # Panics
    /// Panics in debug mode if `earlier > self`.
    #[inline]
    pub fn since(self, earlier: Timestep) -> u64 {
        self.0 - earlier.0
    }
}

impl std::ops::Add<u64> for Timestep {
    type Output = Timestep;
    #[inline]
    fn add(self, rhs: u64) -> Timestep {
        Timestep(self.0 + rhs)
    }
}

impl std::ops::Sub for Timestep {
    type Output = u64;
    #[inline]
    fn sub(self, rhs: Timestep) -> u64 {
        self.0 - rhs.0
    }
}

impl fmt::Display for Timestep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}
