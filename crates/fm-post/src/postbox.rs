//! `PostBox<M>` — double-buffered queue with concurrent producers.

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::{PostError, PostResult};

/// Two buffers and a flag naming the one currently receiving appends.
///
/// `add` takes `&self` and may be called from any number of threads at once;
/// appends are serialised by the buffer's mutex.  Draining goes through
/// [`PostBox::process`], which never drains the buffer producers are writing
/// to.
pub struct PostBox<M> {
    buffers:        [Mutex<Vec<M>>; 2],
    writing_to_tmp: AtomicBool,
}

/// Counters reported by one [`PostBox::process`] call.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Drained {
    /// Non-empty batches handed to the delivery closure.
    pub rounds: u32,
    /// Items delivered across all rounds.
    pub items:  usize,
}

impl<M> Default for PostBox<M> {
    fn default() -> Self {
        Self {
            buffers:        [Mutex::new(Vec::new()), Mutex::new(Vec::new())],
            writing_to_tmp: AtomicBool::new(false),
        }
    }
}

impl<M> PostBox<M> {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn active(&self) -> usize {
        self.writing_to_tmp.load(Ordering::Acquire) as usize
    }

    /// Append one item to the active buffer.
    pub fn add(&self, item: M) {
        self.buffers[self.active()].lock().push(item);
    }

    /// Append many items under a single lock acquisition.
    pub fn extend<I: IntoIterator<Item = M>>(&self, items: I) {
        self.buffers[self.active()].lock().extend(items);
    }

    /// Queued items across both buffers.
    pub fn len(&self) -> usize {
        self.buffers[0].lock().len() + self.buffers[1].lock().len()
    }

    /// `true` when both buffers are empty.
    pub fn is_empty(&self) -> bool {
        self.buffers[0].lock().is_empty() && self.buffers[1].lock().is_empty()
    }

    /// Drop everything queued in both buffers.
    pub fn clear(&self) {
        self.buffers[0].lock().clear();
        self.buffers[1].lock().clear();
    }

    /// Redirect producers to the other buffer and take the contents of the
    /// one they were writing to.
    fn swap(&self) -> Vec<M> {
        let draining = self.writing_to_tmp.fetch_xor(true, Ordering::AcqRel) as usize;
        mem::take(&mut *self.buffers[draining].lock())
    }

    /// Drain until both buffers are empty in the same pass.
    ///
    /// Each non-empty batch is handed to `deliver`.  Items that `deliver`
    /// (or any concurrent producer) adds while a batch is out are delivered
    /// by a later round of this same call.  More than `max_rounds` non-empty
    /// rounds fails with [`PostError::RoundLimit`].
    ///
    /// Calling `process` on an empty postbox does nothing.
    pub fn process<E, F>(&self, max_rounds: u32, mut deliver: F) -> Result<Drained, E>
    where
        F: FnMut(Vec<M>) -> Result<(), E>,
        E: From<PostError>,
    {
        let mut drained = Drained::default();
        loop {
            let batch = self.swap();
            if batch.is_empty() {
                if self.is_empty() {
                    break;
                }
                continue;
            }
            if drained.rounds >= max_rounds {
                self.put_back(batch);
                return Err(PostError::RoundLimit { rounds: drained.rounds }.into());
            }
            drained.rounds += 1;
            drained.items += batch.len();
            deliver(batch)?;
        }
        Ok(drained)
    }

    /// Return an undelivered batch to the active buffer, ahead of anything
    /// queued since.
    fn put_back(&self, mut batch: Vec<M>) {
        let mut active = self.buffers[self.active()].lock();
        batch.append(&mut active);
        *active = batch;
    }

    /// Drain every queued item without delivering it.
    pub fn take_all(&self) -> PostResult<Vec<M>> {
        let mut all = Vec::new();
        self.process::<PostError, _>(u32::MAX, |mut batch| {
            all.append(&mut batch);
            Ok(())
        })?;
        Ok(all)
    }
}
