//! `TreeCache` — children, depth, and roots derived from the parent links.
//!
//! The cache is rebuilt from scratch by every census that changes the array
//! and never patched in between, so it always describes the array exactly as
//! the last census left it.

use std::collections::VecDeque;

use fm_core::AgentIndex;

use crate::{FormationError, FormationResult};

/// Derived hierarchy of a [`FormationTree`][crate::FormationTree].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TreeCache {
    parents:   Vec<Option<AgentIndex>>,
    children:  Vec<Vec<AgentIndex>>,
    depth:     Vec<u32>,
    roots:     Vec<AgentIndex>,
    max_depth: u32,
}

impl TreeCache {
    /// Build from each agent's parent link, in array order.
    ///
    /// Children lists and the root list come out in ascending index order.
    /// Fails on a parent index outside the array or on a node that no root
    /// reaches (a cycle).
    pub fn build<I>(parents: I) -> FormationResult<Self>
    where
        I: IntoIterator<Item = Option<AgentIndex>>,
    {
        let parents: Vec<Option<AgentIndex>> = parents.into_iter().collect();
        let len = parents.len();

        let mut children = vec![Vec::new(); len];
        let mut roots = Vec::new();
        for (i, parent) in parents.iter().enumerate() {
            let child = AgentIndex(i as u32);
            match *parent {
                None => roots.push(child),
                Some(p) if p.index() < len => children[p.index()].push(child),
                Some(p) => {
                    return Err(FormationError::ParentOutOfRange { child, parent: p, len });
                }
            }
        }

        // Breadth-first from every root assigns depths.
        const UNSEEN: u32 = u32::MAX;
        let mut depth = vec![UNSEEN; len];
        let mut max_depth = 0;
        let mut queue: VecDeque<AgentIndex> = roots.iter().copied().collect();
        for r in &roots {
            depth[r.index()] = 0;
        }
        while let Some(node) = queue.pop_front() {
            let d = depth[node.index()] + 1;
            for &c in &children[node.index()] {
                depth[c.index()] = d;
                max_depth = max_depth.max(d);
                queue.push_back(c);
            }
        }

        if let Some(i) = depth.iter().position(|&d| d == UNSEEN) {
            return Err(FormationError::ParentCycle { index: AgentIndex(i as u32) });
        }

        Ok(Self { parents, children, depth, roots, max_depth })
    }

    /// Number of nodes described.
    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    /// Parent of `node`, `None` for roots and out-of-range indices.
    pub fn parent(&self, node: AgentIndex) -> Option<AgentIndex> {
        self.parents.get(node.index()).copied().flatten()
    }

    /// Children of `node` in ascending index order.
    pub fn children(&self, node: AgentIndex) -> &[AgentIndex] {
        self.children
            .get(node.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Lowest-indexed child of `node`.
    pub fn first_child(&self, node: AgentIndex) -> Option<AgentIndex> {
        self.children(node).first().copied()
    }

    /// Distance from `node` to its root; roots have depth 0.
    pub fn depth(&self, node: AgentIndex) -> Option<u32> {
        self.depth.get(node.index()).copied()
    }

    /// Every parentless node, ascending.
    pub fn roots(&self) -> &[AgentIndex] {
        &self.roots
    }

    /// Largest depth in the tree (0 for an empty or flat tree).
    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn is_root(&self, node: AgentIndex) -> bool {
        node.index() < self.len() && self.parents[node.index()].is_none()
    }

    pub fn is_leaf(&self, node: AgentIndex) -> bool {
        node.index() < self.len() && self.children[node.index()].is_empty()
    }

    /// Walk from `node`'s parent up to its root.
    pub fn ancestors(&self, node: AgentIndex) -> impl Iterator<Item = AgentIndex> + '_ {
        std::iter::successors(self.parent(node), move |&p| self.parent(p))
    }

    /// `node` and all of its descendants, breadth-first.
    pub fn subtree(&self, node: AgentIndex) -> Vec<AgentIndex> {
        if node.index() >= self.len() {
            return Vec::new();
        }
        let mut out = vec![node];
        let mut head = 0;
        while head < out.len() {
            let n = out[head];
            head += 1;
            out.extend_from_slice(self.children(n));
        }
        out
    }
}
