//! Census building blocks: death closure, orphan filtering, compaction.
//!
//! The census is the only place the population's shape changes.  It runs
//! between phases, never concurrently with a tick or a delivery on the same
//! formation, and is sequential inside one formation.
//!
//! ```text
//! requested deaths ──closure──▶ death set ──┐
//! pending births/inserts ──orphan filter──▶ survivors ──compact──▶ new array + IndexMap
//! ```

use std::collections::VecDeque;

use fm_core::AgentIndex;

use crate::origin::Origin;
use crate::{FormationError, FormationResult, IndexMap, TreeCache};

// ── Pending handles ───────────────────────────────────────────────────────────

/// Handle to an agent requested this step but not yet placed in the array.
///
/// The number is the request's position in its pending list, in the order
/// requests arrived.  That order is not the placement order: the census
/// places new agents by origin.  Handles are only meaningful until the next
/// census; [`CensusReport::resolve`] turns them into indices.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum PendingAgent {
    Born(u32),
    Inserted(u32),
}

/// Where an inserted agent hangs in the tree.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Ancestor {
    /// An agent already in the array (pre-census index).
    Existing(AgentIndex),
    /// An agent requested earlier in the same step.
    Pending(PendingAgent),
}

impl From<AgentIndex> for Ancestor {
    fn from(index: AgentIndex) -> Self {
        Ancestor::Existing(index)
    }
}

impl From<PendingAgent> for Ancestor {
    fn from(handle: PendingAgent) -> Self {
        Ancestor::Pending(handle)
    }
}

/// A birth waiting for the census.
pub(crate) struct PendingBirth<T> {
    pub(crate) origin: Origin,
    pub(crate) agent:  T,
}

/// An insert waiting for the census.
pub(crate) struct PendingInsert<T> {
    pub(crate) origin:   Origin,
    pub(crate) ancestor: Ancestor,
    pub(crate) agent:    T,
}

// ── CensusReport ──────────────────────────────────────────────────────────────

/// What a census did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CensusReport {
    /// `false` when nothing was pending and the array was left alone.
    pub changed:   bool,
    /// Relabelling of the pre-census array.
    pub index_map: IndexMap,
    /// New index of each pending birth by handle number, `None` if it was
    /// filtered out.
    pub births:    Vec<Option<AgentIndex>>,
    /// New index of each pending insert by handle number, `None` if it was
    /// filtered out.
    pub inserts:   Vec<Option<AgentIndex>>,
    /// Pre-existing agents removed (requested deaths plus their subtrees).
    pub removed:   usize,
    /// Population after the census.
    pub len:       usize,
}

impl CensusReport {
    pub(crate) fn unchanged(len: usize) -> Self {
        Self {
            changed:   false,
            index_map: IndexMap::identity(len),
            births:    Vec::new(),
            inserts:   Vec::new(),
            removed:   0,
            len,
        }
    }

    /// New index of a handle returned by `birth`/`insert` before this census.
    pub fn resolve(&self, handle: PendingAgent) -> Option<AgentIndex> {
        match handle {
            PendingAgent::Born(k)     => self.births.get(k as usize).copied().flatten(),
            PendingAgent::Inserted(k) => self.inserts.get(k as usize).copied().flatten(),
        }
    }

    /// New index of any ancestor reference.
    pub fn resolve_ancestor(&self, ancestor: Ancestor) -> Option<AgentIndex> {
        match ancestor {
            Ancestor::Existing(i) => self.index_map.get(i),
            Ancestor::Pending(h)  => self.resolve(h),
        }
    }
}

// ── Death closure ─────────────────────────────────────────────────────────────

/// Indices removed by a census, both as a mask and as a sorted list.
pub(crate) struct DeathSet {
    pub(crate) mask:   Vec<bool>,
    pub(crate) sorted: Vec<AgentIndex>,
}

impl DeathSet {
    #[inline]
    pub(crate) fn contains(&self, index: AgentIndex) -> bool {
        self.mask.get(index.index()).copied().unwrap_or(false)
    }
}

/// Seed a death set with `requested` and, when a tree is given, expand it
/// breadth-first to every descendant under the pre-census children relation.
pub(crate) fn death_closure(
    len:       usize,
    requested: &[AgentIndex],
    tree:      Option<&TreeCache>,
) -> FormationResult<DeathSet> {
    if let Some(cache) = tree {
        if cache.len() != len {
            return Err(FormationError::CacheOutOfSync { cache: cache.len(), agents: len });
        }
    }

    let mut mask = vec![false; len];
    let mut queue = VecDeque::new();
    for &index in requested {
        if index.index() >= len {
            return Err(FormationError::DeathOutOfRange { index, len });
        }
        if !mask[index.index()] {
            mask[index.index()] = true;
            queue.push_back(index);
        }
    }

    if let Some(cache) = tree {
        while let Some(node) = queue.pop_front() {
            for &child in cache.children(node) {
                if !mask[child.index()] {
                    mask[child.index()] = true;
                    queue.push_back(child);
                }
            }
        }
    }

    let sorted = mask
        .iter()
        .enumerate()
        .filter(|&(_, &dead)| dead)
        .map(|(i, _)| AgentIndex(i as u32))
        .collect();
    Ok(DeathSet { mask, sorted })
}

// ── Orphan filtering ──────────────────────────────────────────────────────────

/// Decide which pending births and inserts survive.
///
/// A birth dies with its declared parent.  An insert dies with its ancestor,
/// whether that ancestor is an existing agent in the death set or a pending
/// agent filtered out here.  Inserts can only name handles returned before
/// them, so one forward pass reaches the fixed point.
pub(crate) fn filter_orphans(
    old_len:       usize,
    deaths:        &DeathSet,
    birth_parents: &[Option<AgentIndex>],
    inserts:       &[Ancestor],
) -> FormationResult<(Vec<bool>, Vec<bool>)> {
    let mut birth_alive = Vec::with_capacity(birth_parents.len());
    for (k, parent) in birth_parents.iter().enumerate() {
        let alive = match *parent {
            None => true,
            Some(p) if p.index() < old_len => !deaths.contains(p),
            Some(p) => {
                return Err(FormationError::ParentOutOfRange {
                    child:  AgentIndex((old_len + k) as u32),
                    parent: p,
                    len:    old_len,
                });
            }
        };
        birth_alive.push(alive);
    }

    let mut insert_alive: Vec<bool> = Vec::with_capacity(inserts.len());
    for (k, ancestor) in inserts.iter().enumerate() {
        let alive = match *ancestor {
            Ancestor::Existing(i) => {
                if i.index() >= old_len {
                    return Err(FormationError::ParentOutOfRange {
                        child:  AgentIndex((old_len + birth_parents.len() + k) as u32),
                        parent: i,
                        len:    old_len,
                    });
                }
                !deaths.contains(i)
            }
            Ancestor::Pending(handle @ PendingAgent::Born(b)) => *birth_alive
                .get(b as usize)
                .ok_or(FormationError::UnknownPending { handle })?,
            Ancestor::Pending(handle @ PendingAgent::Inserted(j)) => {
                if j as usize >= k {
                    return Err(FormationError::UnknownPending { handle });
                }
                insert_alive[j as usize]
            }
        };
        insert_alive.push(alive);
    }

    Ok((birth_alive, insert_alive))
}

// ── Compaction ────────────────────────────────────────────────────────────────

/// Output of [`compact`].
pub(crate) struct Compacted<T> {
    pub(crate) agents:    Vec<T>,
    pub(crate) index_map: IndexMap,
    pub(crate) births:    Vec<Option<AgentIndex>>,
    pub(crate) inserts:   Vec<Option<AgentIndex>>,
}

/// Which pending agents survive and the order to place them in.
pub(crate) struct Placement<'a> {
    /// Indexed by handle number.
    pub(crate) alive: &'a [bool],
    /// Handle numbers in placement order.
    pub(crate) order: &'a [usize],
}

/// Build the new array: survivors in their old order, then surviving births,
/// then surviving inserts, each group in its placement order.
///
/// The old array is walked once, merged against the sorted death list.
pub(crate) fn compact<T: Clone>(
    old:     &[T],
    deaths:  &DeathSet,
    births:  (Vec<T>, Placement<'_>),
    inserts: (Vec<T>, Placement<'_>),
) -> FormationResult<Compacted<T>> {
    let (births, birth_at) = births;
    let (inserts, insert_at) = inserts;
    let survivors = old.len() - deaths.sorted.len();
    let fresh = birth_at
        .alive
        .iter()
        .chain(insert_at.alive)
        .filter(|&&a| a)
        .count();
    let new_len = survivors + fresh;
    // Every new position must be addressable.
    if new_len > 0 {
        AgentIndex::from_usize(new_len - 1)?;
    }

    let mut agents = Vec::with_capacity(new_len);
    let mut index_map = IndexMap::with_capacity(old.len());

    let mut next_dead = deaths.sorted.iter().peekable();
    for (i, agent) in old.iter().enumerate() {
        if next_dead.peek().is_some_and(|d| d.index() == i) {
            next_dead.next();
            index_map.push(None);
        } else {
            index_map.push(Some(AgentIndex(agents.len() as u32)));
            agents.push(agent.clone());
        }
    }

    let mut place = |pending: Vec<T>, at: Placement<'_>| -> Vec<Option<AgentIndex>> {
        let mut pending: Vec<Option<T>> = pending.into_iter().map(Some).collect();
        let mut placed = vec![None; pending.len()];
        for &k in at.order {
            if !at.alive[k] {
                continue;
            }
            if let Some(agent) = pending[k].take() {
                placed[k] = Some(AgentIndex(agents.len() as u32));
                agents.push(agent);
            }
        }
        placed
    };
    let births = place(births, birth_at);
    let inserts = place(inserts, insert_at);

    Ok(Compacted { agents, index_map, births, inserts })
}
