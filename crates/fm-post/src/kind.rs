//! Delivery ordering tags.

/// Ordering class of a message within one delivery round.
///
/// Every `Increase` message of a batch is applied before any other message of
/// the same batch.  A decrease evaluated first could observe a smaller
/// balance than the one that exists once all same-round increases land.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
pub enum MessageKind {
    Increase,
    Decrease,
    /// Carries no resource semantics; ordered with the decreases.
    #[default]
    Neutral,
}

impl MessageKind {
    #[inline]
    pub fn is_increase(self) -> bool {
        matches!(self, MessageKind::Increase)
    }
}

/// Anything that can report its [`MessageKind`].
pub trait Ordered {
    fn kind(&self) -> MessageKind;
}

/// Split a batch into `(increases, everything_else)`, preserving the relative
/// order inside each half.
pub fn increase_first<M: Ordered>(batch: Vec<M>) -> (Vec<M>, Vec<M>) {
    batch.into_iter().partition(|m| m.kind().is_increase())
}
