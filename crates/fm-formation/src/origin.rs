//! Request ordering keys.
//!
//! Agents tick in parallel, so births, inserts, transactions, and mail reach
//! their shared queues in whatever order the workers get there.  Each request
//! is stamped with an [`Origin`] naming the agent that made it, and consumers
//! sort by that stamp before the order can matter: the census places new
//! agents in origin order, settlement and delivery apply in origin order.
//! The result is the order a single thread walking the agents would produce.
//!
//! The running agent is tracked per thread.  Requests made outside any agent
//! (the host between steps, the world's settlement pass) carry a host origin
//! numbered by the receiving queue, and sort after every agent's requests.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

use fm_core::{AgentIndex, FormationId};

/// Who issued a request, and how many requests that issuer made before it.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Origin {
    /// Formation of the issuing agent.
    pub scope: u32,
    /// Index of the issuing agent, `u32::MAX` for the host.
    pub index: u32,
    pub seq:   u64,
}

impl Origin {
    pub const HOST: u32 = u32::MAX;

    fn host(seq: u64) -> Self {
        Self { scope: Self::HOST, index: Self::HOST, seq }
    }

    /// The stamp packed into one sortable integer.
    #[inline]
    pub fn key(self) -> u128 {
        (u128::from(self.scope) << 96) | (u128::from(self.index) << 64) | u128::from(self.seq)
    }

    pub fn is_host(self) -> bool {
        self.index == Self::HOST
    }
}

thread_local! {
    static CURRENT: Cell<Option<Origin>> = const { Cell::new(None) };
}

/// Restores the previous origin on drop.
struct Restore(Option<Origin>);

impl Drop for Restore {
    fn drop(&mut self) {
        CURRENT.with(|c| c.set(self.0));
    }
}

/// Run `f` as agent `index` of formation `scope`: every request `f` makes on
/// this thread is stamped with that agent.
pub(crate) fn acting_as<R>(scope: FormationId, index: AgentIndex, f: impl FnOnce() -> R) -> R {
    let origin = Origin { scope: scope.0, index: index.0, seq: 0 };
    let _restore = Restore(CURRENT.with(|c| c.replace(Some(origin))));
    f()
}

/// Stamp for the next request made on this thread.  Outside an agent the
/// stamp is drawn from `host`, the receiving queue's own counter.
pub(crate) fn stamp(host: &AtomicU64) -> Origin {
    CURRENT
        .with(|c| {
            let current = c.get()?;
            c.set(Some(Origin { seq: current.seq + 1, ..current }));
            Some(current)
        })
        .unwrap_or_else(|| Origin::host(host.fetch_add(1, Ordering::Relaxed)))
}

/// Positions `0..origins.len()` sorted by origin.  Equal origins keep their
/// queue order.
pub(crate) fn placement(origins: &[Origin]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..origins.len()).collect();
    order.sort_by_key(|&k| origins[k]);
    order
}
