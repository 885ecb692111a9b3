//! Strongly typed, zero-cost identifier wrappers.
//!
//! All IDs are `Copy + Ord + Hash`.  The inner integer is `pub` so a formation
//! can index its arrays with `id.0 as usize`, but callers should prefer the
//! `.index()` helper for clarity.
//!
//! An [`AgentIndex`] is a position in a formation's array, not a stable
//! identity: any Census that removes agents relabels the survivors.

use std::fmt;

use crate::CoreError;

/// Generate a typed ID wrapper around a primitive integer.
macro_rules! typed_id {
    ($(#[$attr:meta])* $vis:vis struct $name:ident($inner:ty);) => {
        $(#[$attr])*
        #[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        $vis struct $name(pub $inner);

        impl $name {
            /// Sentinel meaning "no valid ID".
            pub const INVALID: $name = $name(<$inner>::MAX);

            /// Cast to `usize` for direct use as a `Vec` index.
            #[inline(always)]
            pub fn index(self) -> usize {
                self.0 as usize
            }

            /// `true` unless this is the `INVALID` sentinel.
            #[inline(always)]
            pub fn is_valid(self) -> bool {
                self != Self::INVALID
            }
        }

        impl Default for $name {
            /// Returns the `INVALID` sentinel so uninitialized IDs are visibly invalid.
            #[inline(always)]
            fn default() -> Self {
                Self::INVALID
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl From<$name> for usize {
            #[inline(always)]
            fn from(id: $name) -> usize {
                id.0 as usize
            }
        }

        impl TryFrom<usize> for $name {
            type Error = std::num::TryFromIntError;
            fn try_from(n: usize) -> Result<$name, Self::Error> {
                <$inner>::try_from(n).map($name)
            }
        }
    };
}

typed_id! {
    /// Position of an agent in its formation's array.  Max ~4.3 billion agents.
    pub struct AgentIndex(u32);
}

typed_id! {
    /// Position of a formation in the world's formation list.
    pub struct FormationId(u32);
}

typed_id! {
    /// Small integer tag naming the resource a transaction moves
    /// (energy, water, …).  Interpretation belongs to the application.
    pub struct Substance(u8);
}

impl AgentIndex {
    /// Convert an array position, failing if it exceeds the 32-bit range.
    #[inline]
    pub fn from_usize(n: usize) -> Result<AgentIndex, CoreError> {
        AgentIndex::try_from(n).map_err(|_| CoreError::IndexOverflow(n))
    }

    /// Convert an array position that is known to be in range.
    ///
    /// Formations never grow past `u32::MAX` agents (growth goes through
    /// [`AgentIndex::from_usize`]), so positions inside an existing array
    /// always fit.
    #[inline(always)]
    pub fn at(n: usize) -> AgentIndex {
        AgentIndex(n as u32)
    }
}

/// Iterator over every index of an array of length `len`, in ascending order.
pub fn indices(len: usize) -> impl Iterator<Item = AgentIndex> {
    (0..len).map(AgentIndex::at)
}
