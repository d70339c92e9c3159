//! The in-flight request table: maps a `CorrelationId` this `Connection`
//! minted to the `oneshot` sender waiting for that reply's raw body bytes.
//!
//! Grounded in the teacher's `client::client::State` (its `correlation_id`
//! counter) and `MetadataStatus`'s `oneshot::Sender` fan-out, generalized
//! from "one oneshot per pending metadata load" to "one oneshot per
//! in-flight request".

use std::collections::HashMap;

use futures::unsync::oneshot;

use errors::{Error, ErrorKind, Result};
use ids::{ApiKey, CorrelationId};

/// A reply's raw body bytes (everything after the response header) plus
/// the key it was decoded against, handed to whichever `Codec` is waiting.
pub struct RawReply {
    pub api_key: ApiKey,
    pub body: Vec<u8>,
}

enum Slot {
    /// Awaiting a reply; delivering it completes `sender`.
    Active {
        api_key: ApiKey,
        sender: oneshot::Sender<Result<RawReply>>,
    },
    /// The caller gave up (timeout or cancellation) but the request bytes
    /// were already written, so the broker still owes a reply on the
    /// wire. The id stays reserved so that reply is recognized and
    /// silently discarded instead of tripping `CorrelationIdMismatch`.
    Draining,
}

/// Owns correlation id assignment and the pending-reply table for one
/// `Connection`. Not `Send`/`Sync`; lives behind the connection's
/// `Rc<RefCell<_>>`, same as the rest of its mutable state.
pub struct SlotTable {
    next_id: CorrelationId,
    max_in_flight: usize,
    slots: HashMap<CorrelationId, Slot>,
}

impl SlotTable {
    pub fn new(max_in_flight: usize) -> SlotTable {
        SlotTable {
            next_id: 0,
            max_in_flight: max_in_flight,
            slots: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Reserve a fresh correlation id for `api_key`, returning it along
    /// with the receiving half of the oneshot the eventual reply (or a
    /// connection-closing error) will be sent on.
    pub fn reserve(&mut self, api_key: ApiKey) -> Result<(CorrelationId, oneshot::Receiver<Result<RawReply>>)> {
        if self.slots.len() >= self.max_in_flight {
            bail!(ErrorKind::MaxBufferedExceeded);
        }

        let start = self.next_id;

        loop {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);

            if !self.slots.contains_key(&id) {
                let (tx, rx) = oneshot::channel();

                self.slots.insert(id, Slot::Active { api_key: api_key, sender: tx });

                return Ok((id, rx));
            }

            if self.next_id == start {
                bail!(ErrorKind::CorrelationIdLoopExhausted);
            }
        }
    }

    /// Deliver a decoded reply body to the slot `id` names, consuming it.
    ///
    /// A reply for a `Draining` slot (already timed out or canceled) is
    /// discarded silently and the slot removed — this is the drained
    /// reply the caller stopped waiting for, not a mismatch.
    ///
    /// Returns `Err(ErrorKind::CorrelationIdMismatch)` only when `id`
    /// names no slot at all — a real desync, terminal for the owning
    /// `Connection`.
    pub fn complete(&mut self, id: CorrelationId, body: Vec<u8>) -> Result<()> {
        match self.slots.remove(&id) {
            Some(Slot::Active { api_key, sender }) => {
                let _ = sender.send(Ok(RawReply { api_key: api_key, body: body }));
                Ok(())
            }
            Some(Slot::Draining) => Ok(()),
            None => bail!(ErrorKind::CorrelationIdMismatch(id)),
        }
    }

    /// Fail every still-pending slot with a clone of `err`, e.g. when the
    /// connection's read or write half dies. Leaves the table empty.
    pub fn fail_all(&mut self, err: &Error) {
        for (_, slot) in self.slots.drain() {
            if let Slot::Active { sender, .. } = slot {
                let _ = sender.send(Err(clone_error(err)));
            }
        }
    }

    /// The caller gave up on `id` (timeout fired, or the request future
    /// was dropped before a reply arrived). The request bytes may already
    /// be on the wire, so the id stays reserved in `Draining` state rather
    /// than being freed immediately — a reply that shows up later is
    /// discarded by `complete` instead of tripping `CorrelationIdMismatch`.
    pub fn cancel(&mut self, id: CorrelationId) {
        if self.slots.contains_key(&id) {
            self.slots.insert(id, Slot::Draining);
        }
    }
}

/// `error_chain`'s `Error` isn't `Clone`; `fail_all` needs to hand the same
/// failure to every pending caller, so it reconstructs an equivalent error
/// from the original's `ErrorKind` rendering instead of cloning it.
fn clone_error(err: &Error) -> Error {
    ErrorKind::Msg(err.to_string()).into()
}

#[cfg(test)]
mod tests {
    use futures::Future;

    use super::*;

    #[test]
    fn reserve_assigns_increasing_ids_until_wraparound() {
        let mut table = SlotTable::new(8);

        let (first, _rx1) = table.reserve(3).unwrap();
        let (second, _rx2) = table.reserve(3).unwrap();

        assert_eq!(second, first.wrapping_add(1));
    }

    #[test]
    fn reserve_past_max_in_flight_fails() {
        let mut table = SlotTable::new(1);

        let _first = table.reserve(3).unwrap();

        assert!(table.reserve(3).is_err());
    }

    #[test]
    fn complete_unknown_id_is_a_mismatch() {
        let mut table = SlotTable::new(8);

        assert!(table.complete(42, Vec::new()).is_err());
    }

    #[test]
    fn complete_delivers_body_to_receiver() {
        let mut table = SlotTable::new(8);

        let (id, rx) = table.reserve(3).unwrap();

        table.complete(id, vec![1, 2, 3]).unwrap();

        let reply = rx.wait().unwrap().unwrap();

        assert_eq!(reply.api_key, 3);
        assert_eq!(reply.body, vec![1, 2, 3]);
    }

    #[test]
    fn fail_all_empties_table_and_notifies_receivers() {
        let mut table = SlotTable::new(8);

        let (_id1, rx1) = table.reserve(1).unwrap();
        let (_id2, rx2) = table.reserve(2).unwrap();

        table.fail_all(&ErrorKind::ConnectionClosed.into());

        assert_eq!(table.len(), 0);
        assert!(rx1.wait().unwrap().is_err());
        assert!(rx2.wait().unwrap().is_err());
    }

    #[test]
    fn cancel_drops_the_receiver_without_freeing_the_id() {
        let mut table = SlotTable::new(8);

        let (id, rx) = table.reserve(1).unwrap();

        table.cancel(id);

        // the id is still occupied (draining), not available for reuse
        assert_eq!(table.len(), 1);
        assert!(rx.wait().is_err()); // sender dropped, no message ever sent
    }

    #[test]
    fn late_reply_after_cancel_is_discarded_not_a_mismatch() {
        let mut table = SlotTable::new(8);

        let (id, _rx) = table.reserve(1).unwrap();
        table.cancel(id);

        assert!(table.complete(id, vec![9, 9]).is_ok());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn cancel_of_unknown_id_is_a_no_op() {
        let mut table = SlotTable::new(8);

        table.cancel(999);

        assert_eq!(table.len(), 0);
    }
}
