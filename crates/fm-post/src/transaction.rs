//! Resource transfers batched by substance.

use fm_core::{AgentIndex, Substance};
use log::warn;

use crate::MessageKind;

/// Side of a transfer as seen by the agent receiving the settlement.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum TransactionKind {
    /// The agent gains `amount`.
    Increase,
    /// The agent loses `amount`.
    Decrease,
}

impl From<TransactionKind> for MessageKind {
    fn from(kind: TransactionKind) -> MessageKind {
        match kind {
            TransactionKind::Increase => MessageKind::Increase,
            TransactionKind::Decrease => MessageKind::Decrease,
        }
    }
}

/// One `amount` moving from `src` to `dst` inside a single formation.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Transaction {
    pub src:    AgentIndex,
    pub dst:    AgentIndex,
    pub amount: f32,
    /// Sort key; [`TransactionsBox::drain`] returns each batch ascending.
    pub order:  u128,
}

/// Transactions grouped by substance tag.
///
/// Slots are allocated lazily the first time a substance is seen; tags are
/// small integers so a `Vec` indexed by tag is enough.
#[derive(Debug, Default)]
pub struct TransactionsBox {
    by_substance: Vec<Vec<Transaction>>,
    len:          usize,
    next_order:   u128,
}

impl TransactionsBox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transfer, ordered after every transfer added before it.
    pub fn add(&mut self, substance: Substance, src: AgentIndex, dst: AgentIndex, amount: f32) {
        let order = self.next_order;
        self.add_ordered(substance, src, dst, amount, order);
    }

    /// Record a transfer with an explicit sort key.  Producers on several
    /// threads use this to make the drained order independent of who pushed
    /// first.
    ///
    /// A negative amount is stored as the reverse transfer.  Zero and
    /// non-finite amounts are dropped.
    pub fn add_ordered(
        &mut self,
        substance: Substance,
        src:       AgentIndex,
        dst:       AgentIndex,
        amount:    f32,
        order:     u128,
    ) {
        self.next_order = self.next_order.max(order.saturating_add(1));
        if !amount.is_finite() {
            warn!("dropping non-finite {substance} transaction {src} -> {dst}");
            return;
        }
        if amount == 0.0 {
            return;
        }
        let tx = if amount > 0.0 {
            Transaction { src, dst, amount, order }
        } else {
            Transaction { src: dst, dst: src, amount: -amount, order }
        };

        let slot = substance.index();
        if slot >= self.by_substance.len() {
            self.by_substance.resize_with(slot + 1, Vec::new);
        }
        self.by_substance[slot].push(tx);
        self.len += 1;
    }

    /// Total transactions across all substances.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Transactions recorded for `substance` so far.
    pub fn get(&self, substance: Substance) -> &[Transaction] {
        self.by_substance
            .get(substance.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Non-empty substance batches in ascending tag order.
    pub fn iter(&self) -> impl Iterator<Item = (Substance, &[Transaction])> + '_ {
        self.by_substance
            .iter()
            .enumerate()
            .filter(|(_, txs)| !txs.is_empty())
            .map(|(i, txs)| (Substance(i as u8), txs.as_slice()))
    }

    /// Remove and return every batch, keeping the slot allocation.  Each
    /// batch is sorted by `order`; equal keys keep the order they were added.
    pub fn drain(&mut self) -> Vec<(Substance, Vec<Transaction>)> {
        self.len = 0;
        self.next_order = 0;
        self.by_substance
            .iter_mut()
            .enumerate()
            .filter(|(_, txs)| !txs.is_empty())
            .map(|(i, txs)| {
                let mut batch = std::mem::take(txs);
                batch.sort_by_key(|tx| tx.order);
                (Substance(i as u8), batch)
            })
            .collect()
    }
}
