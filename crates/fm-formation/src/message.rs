//! Typed messages, their envelope, and the send-only handle given to handlers.

use std::marker::PhantomData;
use std::sync::atomic::AtomicU64;

use fm_core::{AgentIndex, Substance, Timestep};
use fm_post::{MessageKind, Ordered, PostBox, Recipients, TransactionKind};

use crate::origin::{self, Origin};
use crate::{Ledger, WorldView};

// ── Message ───────────────────────────────────────────────────────────────────

/// Something delivered to agents of type `T` after the tick.
///
/// `receive` may only touch the agent it is handed and may send further mail
/// through `courier`.  It gets no read access to any formation: during
/// delivery the arrays are being written.
pub trait Message<T>: Send + Sync + 'static {
    /// Ordering class within a delivery round.
    fn kind(&self) -> MessageKind {
        MessageKind::Neutral
    }

    fn receive(&self, agent: &mut T, index: AgentIndex, courier: &Courier<'_, T>);
}

/// Adapter turning a closure into a [`Message`].
pub struct FnMessage<T, F> {
    kind: MessageKind,
    f:    F,
    _of:  PhantomData<fn(&mut T)>,
}

/// Wrap `f` as a message of the given kind.
pub fn message_fn<T, F>(kind: MessageKind, f: F) -> FnMessage<T, F>
where
    F: Fn(&mut T, AgentIndex) + Send + Sync + 'static,
{
    FnMessage { kind, f, _of: PhantomData }
}

impl<T, F> Message<T> for FnMessage<T, F>
where
    T: 'static,
    F: Fn(&mut T, AgentIndex) + Send + Sync + 'static,
{
    fn kind(&self) -> MessageKind {
        self.kind
    }

    fn receive(&self, agent: &mut T, index: AgentIndex, _courier: &Courier<'_, T>) {
        (self.f)(agent, index)
    }
}

/// One side of a settled transaction, routed through the postbox so that it
/// obeys the increase-first rule.
pub(crate) struct Settlement {
    pub(crate) substance: Substance,
    pub(crate) amount:    f32,
    pub(crate) side:      TransactionKind,
}

impl<T: Ledger> Message<T> for Settlement {
    fn kind(&self) -> MessageKind {
        self.side.into()
    }

    fn receive(&self, agent: &mut T, _index: AgentIndex, _courier: &Courier<'_, T>) {
        agent.settle(self.substance, self.amount, self.side);
    }
}

// ── MessageWrapper ────────────────────────────────────────────────────────────

/// A message plus its recipients.  Immutable once queued.
pub struct MessageWrapper<T> {
    pub message:    Box<dyn Message<T>>,
    pub recipients: Recipients,
    /// The agent that sent it; delivery applies a batch in origin order.
    pub origin:     Origin,
}

impl<T: 'static> Ordered for MessageWrapper<T> {
    fn kind(&self) -> MessageKind {
        self.message.kind()
    }
}

// ── Mailbox ───────────────────────────────────────────────────────────────────

/// A formation's postbox with typed send helpers.
pub struct Mailbox<T> {
    inner:    PostBox<MessageWrapper<T>>,
    host_seq: AtomicU64,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self { inner: PostBox::new(), host_seq: AtomicU64::new(0) }
    }
}

impl<T: 'static> Mailbox<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broadcast to every agent.
    pub fn send<M: Message<T>>(&self, message: M) {
        self.post(Box::new(message), Recipients::All);
    }

    /// Address one agent.
    pub fn send_to<M: Message<T>>(&self, index: AgentIndex, message: M) {
        self.post(Box::new(message), Recipients::one(index));
    }

    /// Address a set of agents; duplicates receive the message once.
    pub fn send_to_many<M, I>(&self, indices: I, message: M)
    where
        M: Message<T>,
        I: IntoIterator<Item = AgentIndex>,
    {
        self.post(Box::new(message), Recipients::only(indices));
    }

    /// Queue an already boxed message.
    pub fn post(&self, message: Box<dyn Message<T>>, recipients: Recipients) {
        let origin = origin::stamp(&self.host_seq);
        self.inner.add(MessageWrapper { message, recipients, origin });
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub(crate) fn postbox(&self) -> &PostBox<MessageWrapper<T>> {
        &self.inner
    }
}

// ── Courier ───────────────────────────────────────────────────────────────────

/// Send-only capability handed to message handlers.
///
/// Mail sent to the handler's own formation lands in the buffer that is not
/// being drained and is delivered by a later round of the same delivery.
/// Mail sent to another formation is drained when the world runs its next
/// delivery round.
pub struct Courier<'a, T> {
    own:      &'a Mailbox<T>,
    world:    &'a WorldView<'a>,
    timestep: Timestep,
}

impl<'a, T: 'static> Courier<'a, T> {
    pub(crate) fn new(own: &'a Mailbox<T>, world: &'a WorldView<'a>, timestep: Timestep) -> Self {
        Self { own, world, timestep }
    }

    pub fn timestep(&self) -> Timestep {
        self.timestep
    }

    /// Broadcast to the handler's own formation.
    pub fn send<M: Message<T>>(&self, message: M) {
        self.own.send(message);
    }

    /// Address one agent of the handler's own formation.
    pub fn send_to<M: Message<T>>(&self, index: AgentIndex, message: M) {
        self.own.send_to(index, message);
    }

    /// Mailbox of the first formation in the world whose agents are `U`.
    pub fn mailbox<U: Ledger>(&self) -> Option<&'a Mailbox<U>> {
        self.world.mailbox::<U>()
    }
}
