//! Applying one drained batch of mail to an agent array.

use fm_core::{AgentIndex, FormationId};
use fm_post::{Recipients, increase_first};
use rayon::prelude::*;

use crate::origin::acting_as;
use crate::{Courier, FormationError, FormationResult, MessageWrapper};

/// Deliver `batch` into `agents`.
///
/// Every recipient is range-checked before any message is applied, so an
/// invalid batch leaves the array untouched.  The batch is put in origin
/// order, then all `Increase` messages are applied before the rest.  Within
/// each pass an agent sees its messages in that order, whichever strategy
/// runs.  Mail a handler sends is stamped as coming from its recipient in
/// formation `scope`.
pub(crate) fn deliver_batch<T: Send + Sync + 'static>(
    agents:   &mut [T],
    batch:    Vec<MessageWrapper<T>>,
    scope:    FormationId,
    courier:  &Courier<'_, T>,
    parallel: bool,
) -> FormationResult<()> {
    let len = agents.len();
    for wrapper in &batch {
        if let Some(index) = wrapper.recipients.max_index() {
            if index.index() >= len {
                return Err(FormationError::RecipientOutOfRange { index, len });
            }
        }
    }

    let mut batch = batch;
    batch.sort_by_key(|wrapper| wrapper.origin);
    let (increases, rest) = increase_first(batch);
    for pass in [increases, rest] {
        if pass.is_empty() {
            continue;
        }
        if parallel {
            scan_by_agent(agents, &pass, scope, courier);
        } else {
            walk_messages(agents, &pass, scope, courier);
        }
    }
    Ok(())
}

/// One message at a time, touching only its recipients.
fn walk_messages<T: 'static>(
    agents:  &mut [T],
    pass:    &[MessageWrapper<T>],
    scope:   FormationId,
    courier: &Courier<'_, T>,
) {
    let receive = |wrapper: &MessageWrapper<T>, agent: &mut T, index: AgentIndex| {
        acting_as(scope, index, || wrapper.message.receive(agent, index, courier));
    };
    for wrapper in pass {
        match &wrapper.recipients {
            Recipients::All => {
                for (i, agent) in agents.iter_mut().enumerate() {
                    receive(wrapper, agent, AgentIndex(i as u32));
                }
            }
            Recipients::Only(list) => {
                for &index in list {
                    receive(wrapper, &mut agents[index.index()], index);
                }
            }
        }
    }
}

/// Agents split across threads; each scans the whole pass for mail
/// addressed to it.  No two threads ever hold the same slot.
fn scan_by_agent<T: Send + Sync + 'static>(
    agents:  &mut [T],
    pass:    &[MessageWrapper<T>],
    scope:   FormationId,
    courier: &Courier<'_, T>,
) {
    agents.par_iter_mut().enumerate().for_each(|(i, agent)| {
        let index = AgentIndex(i as u32);
        for wrapper in pass {
            if wrapper.recipients.includes(index) {
                acting_as(scope, index, || wrapper.message.receive(agent, index, courier));
            }
        }
    });
}
