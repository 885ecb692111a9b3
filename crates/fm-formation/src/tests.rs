//! Unit tests for fm-formation.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use fm_core::{AgentIndex, FormationConfig, Substance, Timestep};
use fm_post::{MessageKind, PostError, TransactionKind};

use crate::*;

// ── Helpers ───────────────────────────────────────────────────────────────────

const WATER: Substance = Substance(0);

/// Flat test agent: counts its ticks and holds a clamped balance.
#[derive(Clone, Debug, PartialEq)]
struct Cell {
    value:   i64,
    balance: f32,
    /// Value of the previous agent as seen during the last tick.
    seen:    Option<i64>,
}

impl Cell {
    fn new(value: i64) -> Self {
        Self { value, balance: 0.0, seen: None }
    }

    fn with_balance(balance: f32) -> Self {
        Self { value: 0, balance, seen: None }
    }
}

impl Ledger for Cell {
    fn settle(&mut self, _substance: Substance, amount: f32, kind: TransactionKind) {
        match kind {
            TransactionKind::Increase => self.balance += amount,
            TransactionKind::Decrease => self.balance = (self.balance - amount).max(0.0),
        }
    }
}

impl Agent for Cell {
    fn tick(&mut self, _world: &WorldView<'_>, formation: &Formation<Self>, index: AgentIndex, _t: Timestep) {
        if index.0 > 0 {
            self.seen = formation.get(AgentIndex(index.0 - 1)).map(|c| c.value);
        }
        self.value += 1;
    }
}

/// Tree test agent.
#[derive(Clone, Debug, PartialEq)]
struct Node {
    tag:    &'static str,
    parent: Option<AgentIndex>,
}

impl Node {
    fn root(tag: &'static str) -> Self {
        Self { tag, parent: None }
    }

    fn under(tag: &'static str, parent: u32) -> Self {
        Self { tag, parent: Some(AgentIndex(parent)) }
    }
}

impl Ledger for Node {}

impl TreeAgent for Node {
    fn tick(&mut self, _w: &WorldView<'_>, _f: &FormationTree<Self>, _i: AgentIndex, _t: Timestep) {}

    fn parent(&self) -> Option<AgentIndex> {
        self.parent
    }

    fn census_update_parent(&mut self, parent: Option<AgentIndex>, _token: CensusToken) {
        self.parent = parent;
    }
}

fn cells(values: &[i64]) -> Formation<Cell> {
    Formation::new("cells", values.iter().map(|&v| Cell::new(v)).collect())
        .with_config(FormationConfig::sequential())
}

fn tree(nodes: Vec<Node>) -> FormationTree<Node> {
    FormationTree::new("tree", nodes)
        .unwrap()
        .with_config(FormationConfig::sequential())
}

fn values(f: &Formation<Cell>) -> Vec<i64> {
    f.snapshot().iter().map(|c| c.value).collect()
}

fn tags(t: &FormationTree<Node>) -> Vec<&'static str> {
    t.snapshot().iter().map(|n| n.tag).collect()
}

fn world() -> WorldView<'static> {
    WorldView::detached(Timestep(0))
}

/// Tick and publish, as the world does for a lone formation.
fn tick(f: &dyn AnyFormation, t: u64) {
    f.tick(&world(), Timestep(t)).unwrap();
    f.publish_tick();
}

/// Adds `n` to the recipient's value.
fn add(n: i64) -> impl Message<Cell> {
    message_fn(MessageKind::Neutral, move |c: &mut Cell, _| c.value += n)
}

// ── Tick ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tick_tests {
    use super::*;

    #[test]
    fn tick_keeps_both_arrays_the_same_length() {
        let f = cells(&[1, 2, 3, 4, 5]);
        tick(&f, 0);
        assert_eq!(f.view().len(), 5);
        assert_eq!(f.committed().len(), 5);
    }

    #[test]
    fn reads_switch_to_working_until_delivery() {
        let f = cells(&[10, 20]);
        assert_eq!(f.read_side(), ReadSide::Committed);

        tick(&f, 0);
        assert_eq!(f.read_side(), ReadSide::Working);
        assert_eq!(values(&f), vec![11, 21]);
        assert_eq!(f.committed()[0].value, 10);

        f.deliver_post(&world(), Timestep(0)).unwrap();
        assert_eq!(f.read_side(), ReadSide::Committed);
        assert_eq!(f.committed()[0].value, 11);
    }

    #[test]
    fn agents_read_committed_state_during_tick() {
        let f = cells(&[1, 2, 3]);
        tick(&f, 0);
        let seen: Vec<_> = f.snapshot().iter().map(|c| c.seen).collect();
        assert_eq!(seen, vec![None, Some(1), Some(2)]);
    }

    #[test]
    fn parallel_and_sequential_tick_agree() {
        let start: Vec<i64> = (0..2_000).collect();
        let par = Formation::new("par", start.iter().map(|&v| Cell::new(v)).collect());
        let seq = cells(&start);
        for t in 0..3 {
            tick(&par, t);
            par.deliver_post(&world(), Timestep(t)).unwrap();
            tick(&seq, t);
            seq.deliver_post(&world(), Timestep(t)).unwrap();
        }
        assert_eq!(par.snapshot(), seq.snapshot());
    }

    #[test]
    fn second_tick_without_delivery_builds_on_the_first() {
        let f = cells(&[0]);
        tick(&f, 0);
        tick(&f, 1);
        assert_eq!(values(&f), vec![2]);
    }

    #[test]
    fn births_requested_before_a_tick_land_first() {
        let f = cells(&[0]);
        f.birth(Cell::new(100));
        tick(&f, 0);
        assert_eq!(values(&f), vec![1, 101]);
        assert_eq!(f.pending_births(), 0);
    }

    #[test]
    fn empty_formation_ticks_and_censuses() {
        let f = cells(&[]);
        assert!(!f.is_alive());
        tick(&f, 0);
        f.deliver_post(&world(), Timestep(0)).unwrap();
        let report = f.census().unwrap();
        assert!(!report.changed);
        assert!(f.is_empty());
    }
}

// ── Delivery ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod delivery_tests {
    use super::*;

    /// Bumps the recipient, then mails it again until `0`.
    struct Bounce(u32);

    impl Message<Cell> for Bounce {
        fn receive(&self, agent: &mut Cell, index: AgentIndex, courier: &Courier<'_, Cell>) {
            agent.value += 1;
            if self.0 > 0 {
                courier.send_to(index, Bounce(self.0 - 1));
            }
        }
    }

    #[test]
    fn targeted_and_broadcast_messages() {
        let f = cells(&[0, 0, 0]);
        f.send(add(1));
        f.send_to(AgentIndex(1), add(10));
        f.send_to_many([AgentIndex(2), AgentIndex(2), AgentIndex(0)], add(100));
        assert!(f.has_undelivered_post());

        f.deliver_post(&world(), Timestep(0)).unwrap();
        assert_eq!(values(&f), vec![101, 11, 101]);
        assert!(!f.has_undelivered_post());
    }

    #[test]
    fn second_delivery_is_a_no_op() {
        let f = cells(&[0, 0]);
        tick(&f, 0);
        f.send(add(5));
        let first = f.deliver_post(&world(), Timestep(0)).unwrap();
        assert_eq!(first.items, 1);
        let after = f.snapshot();

        let second = f.deliver_post(&world(), Timestep(0)).unwrap();
        assert_eq!(second.items, 0);
        assert_eq!(f.snapshot(), after);
    }

    #[test]
    fn increases_land_before_decreases() {
        let f = Formation::new("r", vec![Cell::with_balance(1.0)])
            .with_config(FormationConfig::sequential());
        let take = |n: f32| {
            message_fn(MessageKind::Decrease, move |c: &mut Cell, _| {
                c.balance = (c.balance - n).max(0.0)
            })
        };
        let give = |n: f32| message_fn(MessageKind::Increase, move |c: &mut Cell, _| c.balance += n);
        // Queued decrease-first; applied increase-first.
        f.send_to(AgentIndex(0), take(3.0));
        f.send_to(AgentIndex(0), give(5.0));
        f.deliver_post(&world(), Timestep(0)).unwrap();
        assert_eq!(f.snapshot()[0].balance, 3.0);
    }

    #[test]
    fn cascaded_mail_is_drained_in_the_same_delivery() {
        let f = cells(&[0]);
        f.send_to(AgentIndex(0), Bounce(4));
        let drained = f.deliver_post(&world(), Timestep(0)).unwrap();
        assert_eq!(values(&f), vec![5]);
        assert_eq!(drained.rounds, 5);
    }

    #[test]
    fn round_limit_stops_runaway_cascades() {
        let config = FormationConfig { max_delivery_rounds: 2, ..FormationConfig::sequential() };
        let f = Formation::new("c", vec![Cell::new(0)]).with_config(config);
        f.send_to(AgentIndex(0), Bounce(10));
        let err = f.deliver_post(&world(), Timestep(0)).unwrap_err();
        assert!(matches!(err, FormationError::Post(PostError::RoundLimit { rounds: 2 })));
        assert!(f.has_undelivered_post());
    }

    #[test]
    fn out_of_range_recipient_leaves_array_untouched() {
        let f = cells(&[0, 0]);
        f.send(add(1));
        f.send_to(AgentIndex(5), add(1));
        let err = f.deliver_post(&world(), Timestep(0)).unwrap_err();
        assert!(matches!(
            err,
            FormationError::RecipientOutOfRange { index: AgentIndex(5), len: 2 }
        ));
        assert_eq!(values(&f), vec![0, 0]);
    }

    #[test]
    fn parallel_scan_matches_linear_delivery() {
        let n = 4 * rayon::current_num_threads().max(1) + 1;
        let start: Vec<i64> = (0..n as i64).collect();
        let scan = Formation::new("scan", start.iter().map(|&v| Cell::new(v)).collect())
            .with_config(FormationConfig { delivery_agents_per_thread: 1, ..FormationConfig::default() });
        let linear = cells(&start);
        assert!(scan.config().parallel_delivery(n, rayon::current_num_threads()));

        for f in [&scan, &linear] {
            f.send(message_fn(MessageKind::Neutral, |c: &mut Cell, _| c.value *= 2));
            f.send_to_many((0..n as u32).step_by(3).map(AgentIndex), add(7));
            f.send(message_fn(MessageKind::Increase, |c: &mut Cell, _| c.value += 1));
            f.deliver_post(&world(), Timestep(0)).unwrap();
        }
        assert_eq!(scan.snapshot(), linear.snapshot());
    }
}

// ── Transactions ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod transaction_tests {
    use super::*;

    #[test]
    fn settlement_credits_before_debits() {
        let f = Formation::new("t", vec![Cell::with_balance(1.0), Cell::with_balance(10.0)])
            .with_config(FormationConfig::sequential());
        f.transact(WATER, AgentIndex(1), AgentIndex(0), 5.0);
        f.transact(WATER, AgentIndex(0), AgentIndex(1), 3.0);
        assert!(f.has_unprocessed_transactions());

        assert_eq!(f.process_transactions().unwrap(), 2);
        assert!(!f.has_unprocessed_transactions());
        f.deliver_post(&world(), Timestep(0)).unwrap();

        let balances: Vec<f32> = f.snapshot().iter().map(|c| c.balance).collect();
        assert_eq!(balances, vec![3.0, 8.0]);
    }

    #[test]
    fn out_of_range_transaction_is_an_error() {
        let f = cells(&[0]);
        f.transact(WATER, AgentIndex(0), AgentIndex(3), 1.0);
        let err = f.process_transactions().unwrap_err();
        assert!(matches!(err, FormationError::TransactionOutOfRange { index: AgentIndex(3), .. }));
    }

    #[test]
    fn nothing_to_settle() {
        let f = cells(&[0]);
        assert_eq!(f.process_transactions().unwrap(), 0);
        assert!(!f.has_undelivered_post());
    }
}

// ── Flat census ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod census_tests {
    use super::*;

    struct Counting {
        negative: Arc<AtomicUsize>,
        positive: Arc<AtomicUsize>,
    }

    impl CensusObserver<Cell> for Counting {
        fn post_census_negative(&self, _agents: &[Cell]) {
            self.negative.fetch_add(1, Ordering::Relaxed);
        }

        fn post_census_positive(&self, agents: &[Cell], report: &CensusReport) {
            assert_eq!(agents.len(), report.len);
            self.positive.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn death_and_birth_relabel_survivors() {
        let f = cells(&[0, 1, 2]);
        f.death(AgentIndex(1));
        let born = f.birth(Cell::new(3));
        let report = f.census().unwrap();

        assert!(report.changed);
        assert_eq!(values(&f), vec![0, 2, 3]);
        assert_eq!(report.index_map.get(AgentIndex(0)), Some(AgentIndex(0)));
        assert_eq!(report.index_map.get(AgentIndex(1)), None);
        assert_eq!(report.index_map.get(AgentIndex(2)), Some(AgentIndex(1)));
        assert_eq!(report.resolve(born), Some(AgentIndex(2)));
        assert_eq!(report.removed, 1);
        assert_eq!(f.committed().len(), 3);
    }

    #[test]
    fn duplicate_deaths_remove_once() {
        let f = cells(&[0, 1, 2]);
        f.death(AgentIndex(2));
        f.death(AgentIndex(2));
        let report = f.census().unwrap();
        assert_eq!(values(&f), vec![0, 1]);
        assert_eq!(report.removed, 1);
    }

    #[test]
    fn out_of_range_death_is_an_error() {
        let f = cells(&[0, 1, 2]);
        f.death(AgentIndex(10));
        let err = f.census().unwrap_err();
        assert!(matches!(err, FormationError::DeathOutOfRange { index: AgentIndex(10), len: 3 }));
    }

    #[test]
    fn census_after_tick_installs_into_the_working_side() {
        let f = cells(&[0, 1, 2]);
        tick(&f, 0);
        f.death(AgentIndex(0));
        f.census().unwrap();
        assert_eq!(f.read_side(), ReadSide::Working);
        assert_eq!(values(&f), vec![2, 3]);

        f.deliver_post(&world(), Timestep(0)).unwrap();
        assert_eq!(f.committed().iter().map(|c| c.value).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn observer_sees_both_outcomes() {
        let negative = Arc::new(AtomicUsize::new(0));
        let positive = Arc::new(AtomicUsize::new(0));
        let f = cells(&[0, 1]).with_observer(Counting {
            negative: negative.clone(),
            positive: positive.clone(),
        });

        f.census().unwrap();
        f.death(AgentIndex(0));
        f.census().unwrap();

        assert_eq!(negative.load(Ordering::Relaxed), 1);
        assert_eq!(positive.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn reindex_hook_rewrites_stored_indices() {
        // `seen` doubles as a stored reference to another agent's index.
        let f = Formation::new(
            "r",
            vec![Cell::new(0), Cell { seen: Some(3), ..Cell::new(1) }, Cell::new(2), Cell::new(3)],
        )
        .with_reindex(|agents: &mut [Cell], map: &IndexMap| {
            for a in agents.iter_mut() {
                a.seen = a
                    .seen
                    .and_then(|i| map.get(AgentIndex(i as u32)))
                    .map(|i| i.0 as i64);
            }
        });
        f.death(AgentIndex(0));
        f.death(AgentIndex(2));
        f.census().unwrap();
        assert_eq!(f.snapshot()[0].seen, Some(1));
    }

    #[test]
    fn births_alone_leave_the_index_map_untouched() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let f = cells(&[0, 1]).with_reindex(move |_: &mut [Cell], _: &IndexMap| {
            seen.fetch_add(1, Ordering::Relaxed);
        });
        f.birth(Cell::new(2));
        let report = f.census().unwrap();

        assert!(report.changed);
        assert!(report.index_map.is_identity());
        assert_eq!(calls.load(Ordering::Relaxed), 0);

        f.death(AgentIndex(0));
        f.census().unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}

// ── Tree census ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tree_tests {
    use super::*;

    /// Every non-root is listed under exactly its parent, roots are listed
    /// nowhere, and depth grows by one per edge.
    fn assert_cache_consistent(t: &FormationTree<Node>) {
        let nodes = t.snapshot();
        let cache = t.cache();
        assert_eq!(cache.len(), nodes.len());

        let mut listed = vec![0usize; nodes.len()];
        for p in fm_core::indices(nodes.len()) {
            for &c in cache.children(p) {
                listed[c.index()] += 1;
                assert_eq!(nodes[c.index()].parent, Some(p), "{c} listed under {p}");
                assert_eq!(cache.depth(c), cache.depth(p).map(|d| d + 1));
            }
        }
        for (node, index) in nodes.iter().zip(fm_core::indices(nodes.len())) {
            assert_eq!(cache.parent(index), node.parent);
            match node.parent {
                None => {
                    assert_eq!(listed[index.index()], 0);
                    assert!(cache.roots().contains(&index));
                    assert_eq!(cache.depth(index), Some(0));
                }
                Some(_) => {
                    assert_eq!(listed[index.index()], 1);
                    assert!(!cache.roots().contains(&index));
                }
            }
        }
    }

    #[test]
    fn new_tree_builds_cache() {
        let t = tree(vec![Node::root("r"), Node::under("a", 0), Node::under("b", 1)]);
        assert_eq!(t.roots(), vec![AgentIndex(0)]);
        assert_eq!(t.depth(AgentIndex(2)), Some(2));
        assert_eq!(t.max_depth(), 2);
        assert_eq!(t.ancestors(AgentIndex(2)), vec![AgentIndex(1), AgentIndex(0)]);
    }

    #[test]
    fn new_tree_rejects_bad_parents() {
        let err = FormationTree::new("bad", vec![Node::under("x", 4)]).err().unwrap();
        assert!(matches!(err, FormationError::ParentOutOfRange { .. }));

        let err = FormationTree::new("cycle", vec![Node::under("a", 1), Node::under("b", 0)])
            .err()
            .unwrap();
        assert!(matches!(err, FormationError::ParentCycle { .. }));
    }

    #[test]
    fn killing_the_root_kills_the_subtree() {
        let t = tree(vec![Node::root("root"), Node::under("child", 0)]);
        t.death(AgentIndex(0));
        let report = t.census().unwrap();
        assert_eq!(report.removed, 2);
        assert!(t.is_empty());
        assert!(t.roots().is_empty());

        // An empty tree keeps working.
        tick(&t, 1);
        t.deliver_post(&world(), Timestep(1)).unwrap();
        assert!(!t.census().unwrap().changed);
    }

    #[test]
    fn insert_becomes_first_child_of_its_ancestor() {
        let t = tree(vec![Node::root("root")]);
        let h = t.insert(AgentIndex(0), Node::root("leaf"));
        let report = t.census().unwrap();

        assert_eq!(report.resolve(h), Some(AgentIndex(1)));
        assert_eq!(t.first_child(AgentIndex(0)), Some(AgentIndex(1)));
        assert_eq!(t.roots(), vec![AgentIndex(0)]);
        assert_eq!(t.snapshot()[1].parent, Some(AgentIndex(0)));
        assert_cache_consistent(&t);
    }

    #[test]
    fn dead_middle_node_takes_its_branch() {
        let t = tree(vec![
            Node::root("r"),
            Node::under("a", 0),
            Node::under("a1", 1),
            Node::under("b", 0),
        ]);
        t.death(AgentIndex(1));
        let report = t.census().unwrap();

        assert_eq!(tags(&t), vec!["r", "b"]);
        assert_eq!(report.index_map.get(AgentIndex(3)), Some(AgentIndex(1)));
        assert_eq!(t.snapshot()[1].parent, Some(AgentIndex(0)));
        assert_eq!(t.children(AgentIndex(0)), vec![AgentIndex(1)]);
        assert_cache_consistent(&t);
    }

    #[test]
    fn pending_agents_under_a_dead_parent_are_dropped() {
        let t = tree(vec![Node::root("r"), Node::under("c", 0)]);
        t.death(AgentIndex(1));
        let x = t.insert(AgentIndex(1), Node::root("x"));
        let y = t.insert(x, Node::root("y"));
        let z = t.birth(Node::under("z", 1));
        let report = t.census().unwrap();

        assert_eq!(tags(&t), vec!["r"]);
        assert_eq!(report.resolve(x), None);
        assert_eq!(report.resolve(y), None);
        assert_eq!(report.resolve(z), None);
        assert_cache_consistent(&t);
    }

    #[test]
    fn insert_chain_under_a_birth() {
        let t = tree(vec![Node::root("r")]);
        let b = t.birth(Node::under("b", 0));
        let x = t.insert(b, Node::root("x"));
        let y = t.insert(x, Node::root("y"));
        let report = t.census().unwrap();

        let (b, x, y) = (
            report.resolve(b).unwrap(),
            report.resolve(x).unwrap(),
            report.resolve(y).unwrap(),
        );
        assert_eq!(t.parent(b), Some(AgentIndex(0)));
        assert_eq!(t.parent(x), Some(b));
        assert_eq!(t.parent(y), Some(x));
        assert_eq!(t.depth(y), Some(3));
        assert_eq!(t.subtree(b), vec![b, x, y]);
        assert_cache_consistent(&t);
    }

    #[test]
    fn ancestors_resolve_through_the_report() {
        let t = tree(vec![Node::root("gone"), Node::root("r")]);
        t.death(AgentIndex(0));
        let b = t.birth(Node::root("b"));
        let report = t.census().unwrap();

        assert_eq!(report.resolve_ancestor(Ancestor::Existing(AgentIndex(1))), Some(AgentIndex(0)));
        assert_eq!(report.resolve_ancestor(Ancestor::Existing(AgentIndex(0))), None);
        assert_eq!(report.resolve_ancestor(b.into()), Some(AgentIndex(1)));
        assert_eq!(report.resolve_ancestor(PendingAgent::Inserted(0).into()), None);
        assert!(!report.index_map.is_identity());
    }

    #[test]
    fn parents_are_relabelled_after_earlier_deaths() {
        let t = tree(vec![
            Node::root("gone"),
            Node::root("r"),
            Node::under("a", 1),
            Node::under("b", 2),
        ]);
        t.death(AgentIndex(0));
        let n = t.birth(Node::under("n", 3));
        let report = t.census().unwrap();

        assert_eq!(tags(&t), vec!["r", "a", "b", "n"]);
        let parents: Vec<_> = t.snapshot().iter().map(|n| n.parent).collect();
        assert_eq!(
            parents,
            vec![None, Some(AgentIndex(0)), Some(AgentIndex(1)), Some(AgentIndex(2))]
        );
        assert_eq!(report.resolve(n), Some(AgentIndex(3)));
        assert_cache_consistent(&t);
    }

    #[test]
    fn forward_pending_reference_is_an_error() {
        let t = tree(vec![Node::root("r")]);
        t.insert(PendingAgent::Inserted(3), Node::root("x"));
        let err = t.census().unwrap_err();
        assert!(matches!(err, FormationError::UnknownPending { .. }));
    }

    #[test]
    fn tree_snapshot_rows() {
        let t = tree(vec![Node::root("r"), Node::under("a", 0), Node::under("b", 0)]);
        let rows = t.tree_snapshot();
        assert_eq!(rows[0], SnapshotRow { index: 0, parent: None, depth: 0, children: 2 });
        assert_eq!(rows[2], SnapshotRow { index: 2, parent: Some(0), depth: 1, children: 0 });
        assert!(t.is_leaf(AgentIndex(1)));
        assert!(t.is_root(AgentIndex(0)));
    }
}

// ── Cache ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod cache_tests {
    use super::*;

    #[test]
    fn forest_with_two_roots() {
        let p = |i| Some(AgentIndex(i));
        let cache = TreeCache::build([None, p(0), None, p(2), p(3)]).unwrap();
        assert_eq!(cache.roots(), &[AgentIndex(0), AgentIndex(2)]);
        assert_eq!(cache.depth(AgentIndex(4)), Some(2));
        assert_eq!(cache.max_depth(), 2);
        assert_eq!(cache.first_child(AgentIndex(2)), Some(AgentIndex(3)));
        assert!(cache.children(AgentIndex(9)).is_empty());
        assert_eq!(cache.depth(AgentIndex(9)), None);
    }

    #[test]
    fn empty_cache() {
        let cache = TreeCache::build(std::iter::empty()).unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.max_depth(), 0);
    }
}

// ── World view ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod world_view_tests {
    use super::*;

    /// Counts mail received from another formation.
    #[derive(Clone, Debug, Default)]
    struct Sink {
        hits: u32,
    }

    impl Ledger for Sink {}

    impl Agent for Sink {
        fn tick(&mut self, _w: &WorldView<'_>, _f: &Formation<Self>, _i: AgentIndex, _t: Timestep) {}
    }

    /// Delivered to a `Cell`; forwards a hit to every `Sink`.
    struct Forward;

    impl Message<Cell> for Forward {
        fn receive(&self, agent: &mut Cell, _index: AgentIndex, courier: &Courier<'_, Cell>) {
            agent.value += 1;
            if let Some(sinks) = courier.mailbox::<Sink>() {
                sinks.send(message_fn(MessageKind::Neutral, |s: &mut Sink, _| s.hits += 1));
            }
        }
    }

    fn formations() -> Vec<Box<dyn AnyFormation>> {
        let source: Box<dyn AnyFormation> = Box::new(cells(&[0, 0]));
        let sinks: Box<dyn AnyFormation> = Box::new(
            Formation::new("sinks", vec![Sink::default(); 3])
                .with_config(FormationConfig::sequential()),
        );
        vec![source, sinks]
    }

    #[test]
    fn lookups_by_type_name_and_id() {
        let all = formations();
        let view = WorldView::new(&all, Timestep(4), 9);
        assert_eq!(view.find::<Formation<Sink>>().unwrap().len(), 3);
        assert_eq!(view.by_name("cells").unwrap().len(), 2);
        assert!(view.get_as::<Formation<Cell>>(fm_core::FormationId(0)).is_some());
        assert!(view.get_as::<Formation<Cell>>(fm_core::FormationId(1)).is_none());
        assert!(view.find::<FormationTree<Node>>().is_none());
        assert_eq!(view.timestep(), Timestep(4));
    }

    #[test]
    fn mail_crosses_formations() {
        let all = formations();
        let view = WorldView::new(&all, Timestep(0), 0);
        let source = view.find::<Formation<Cell>>().unwrap();
        source.send_to(AgentIndex(1), Forward);

        all[0].deliver_post(&view, Timestep(0)).unwrap();
        assert!(all[1].has_undelivered_post());
        all[1].deliver_post(&view, Timestep(0)).unwrap();

        let sinks = view.find::<Formation<Sink>>().unwrap();
        assert!(sinks.snapshot().iter().all(|s| s.hits == 1));
        assert_eq!(source.snapshot()[1].value, 1);
    }

    #[test]
    fn agent_rng_is_reproducible() {
        let all = formations();
        let a = WorldView::new(&all, Timestep(3), 42);
        let b = WorldView::new(&all, Timestep(3), 42);
        let x: u64 = a.rng(AgentIndex(7)).random();
        let y: u64 = b.rng(AgentIndex(7)).random();
        assert_eq!(x, y);
    }

    #[test]
    fn flat_snapshot_rows_have_no_structure() {
        let all = formations();
        let rows = all[1].snapshot_rows();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.parent.is_none() && r.depth == 0));
    }
}

// ── Request ordering ──────────────────────────────────────────────────────────

#[cfg(test)]
mod ordering_tests {
    use super::*;

    fn pool(threads: usize) -> rayon::ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(threads).build().unwrap()
    }

    /// Each root grows a child under itself; every third root also seeds a
    /// new root.  `origin` records which root asked.
    #[derive(Clone, Debug, PartialEq)]
    struct Sprout {
        origin: u32,
        parent: Option<AgentIndex>,
    }

    impl Ledger for Sprout {}

    impl TreeAgent for Sprout {
        fn tick(&mut self, _w: &WorldView<'_>, tree: &FormationTree<Self>, index: AgentIndex, _t: Timestep) {
            if self.parent.is_some() {
                return;
            }
            tree.insert(index, Sprout { origin: index.0, parent: None });
            if index.0 % 3 == 0 {
                tree.birth(Sprout { origin: index.0, parent: None });
            }
        }

        fn parent(&self) -> Option<AgentIndex> {
            self.parent
        }

        fn census_update_parent(&mut self, parent: Option<AgentIndex>, _token: CensusToken) {
            self.parent = parent;
        }
    }

    fn grow(roots: u32, config: FormationConfig, threads: usize) -> Vec<Sprout> {
        let start = (0..roots).map(|origin| Sprout { origin, parent: None }).collect();
        let t = FormationTree::new("sprouts", start).unwrap().with_config(config);
        pool(threads).install(|| {
            tick(&t, 0);
            t.deliver_post(&world(), Timestep(0)).unwrap();
            t.census().unwrap();
        });
        t.snapshot()
    }

    #[test]
    fn parallel_structural_requests_land_in_agent_order() {
        let roots = 2_000;
        let expected = grow(roots, FormationConfig::sequential(), 1);
        for _ in 0..5 {
            assert_eq!(grow(roots, FormationConfig::default(), 8), expected);
        }

        // Roots, then births by requester, then inserts by requester.
        let births: Vec<u32> = (0..roots).filter(|i| i % 3 == 0).collect();
        let origins: Vec<u32> = expected.iter().map(|s| s.origin).collect();
        assert_eq!(&origins[..roots as usize], &(0..roots).collect::<Vec<_>>()[..]);
        assert_eq!(&origins[roots as usize..roots as usize + births.len()], &births[..]);
        let inserts = &expected[roots as usize + births.len()..];
        assert_eq!(inserts.len(), roots as usize);
        assert!(
            inserts
                .iter()
                .zip(0..roots)
                .all(|(s, i)| s.origin == i && s.parent == Some(AgentIndex(i)))
        );
    }

    /// Mails agent 0 an order-sensitive update and sends it a transfer.
    #[derive(Clone, Debug, PartialEq)]
    struct Caller {
        trail:   i64,
        balance: f32,
    }

    impl Ledger for Caller {
        fn settle(&mut self, _substance: Substance, amount: f32, kind: TransactionKind) {
            match kind {
                TransactionKind::Increase => self.balance += amount,
                TransactionKind::Decrease => self.balance -= amount,
            }
        }
    }

    impl Agent for Caller {
        fn tick(&mut self, _w: &WorldView<'_>, f: &Formation<Self>, index: AgentIndex, _t: Timestep) {
            let i = i64::from(index.0);
            f.send_to(
                AgentIndex(0),
                message_fn(MessageKind::Neutral, move |c: &mut Caller, _| {
                    c.trail = c.trail.wrapping_mul(31).wrapping_add(i)
                }),
            );
            f.transact(WATER, index, AgentIndex(0), 1.0 / (index.0 as f32 + 3.0));
        }
    }

    fn call(agents: usize, config: FormationConfig, threads: usize) -> (i64, u32) {
        let f = Formation::new("callers", vec![Caller { trail: 0, balance: 1.0 }; agents])
            .with_config(config);
        pool(threads).install(|| {
            tick(&f, 0);
            f.process_transactions().unwrap();
            f.deliver_post(&world(), Timestep(0)).unwrap();
        });
        let first = &f.snapshot()[0];
        (first.trail, first.balance.to_bits())
    }

    #[test]
    fn parallel_mail_and_transfers_apply_in_agent_order() {
        let expected = call(3_000, FormationConfig::sequential(), 1);
        for _ in 0..5 {
            assert_eq!(call(3_000, FormationConfig::default(), 8), expected);
        }
    }

    #[test]
    fn host_requests_follow_agent_requests() {
        let f = Formation::new("callers", vec![Caller { trail: 0, balance: 0.0 }; 2])
            .with_config(FormationConfig::sequential());
        f.send_to(AgentIndex(0), message_fn(MessageKind::Neutral, |c: &mut Caller, _| c.trail = -1));
        tick(&f, 0);
        f.deliver_post(&world(), Timestep(0)).unwrap();
        // Both agents' mail lands before the host's, queued earlier.
        assert_eq!(f.snapshot()[0].trail, -1);
    }
}

// ── Phase guard ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod guard_tests {
    use super::*;

    /// Grows a child, then tries to drive its own formation mid-tick.
    #[derive(Clone, Debug, Default)]
    struct Meddler {
        parent:  Option<AgentIndex>,
        refused: u32,
    }

    impl Ledger for Meddler {}

    impl TreeAgent for Meddler {
        fn tick(&mut self, w: &WorldView<'_>, tree: &FormationTree<Self>, index: AgentIndex, t: Timestep) {
            if self.parent.is_some() {
                return;
            }
            tree.insert(index, Meddler::default());
            let attempts = [
                AnyFormation::census(tree).map(|_| ()),
                AnyFormation::tick(tree, w, t),
                AnyFormation::deliver_post(tree, w, t).map(|_| ()),
                AnyFormation::process_transactions(tree).map(|_| ()),
            ];
            self.refused = attempts
                .iter()
                .filter(|r| matches!(r, Err(FormationError::PhaseDuringTick { .. })))
                .count() as u32;
        }

        fn parent(&self) -> Option<AgentIndex> {
            self.parent
        }

        fn census_update_parent(&mut self, parent: Option<AgentIndex>, _token: CensusToken) {
            self.parent = parent;
        }
    }

    #[test]
    fn phases_called_from_a_tick_are_refused() {
        let t = FormationTree::new("meddlers", vec![Meddler::default()])
            .unwrap()
            .with_config(FormationConfig::sequential());
        tick(&t, 0);

        assert_eq!(t.snapshot()[0].refused, 4);
        assert_eq!(t.pending_inserts(), 1);

        t.deliver_post(&world(), Timestep(0)).unwrap();
        let report = t.census().unwrap();
        assert_eq!(report.len, 2);
        assert_eq!(t.parent(AgentIndex(1)), Some(AgentIndex(0)));
    }
}
