//! Outgoing-request correlation: the ID sequence and the pending table.

use std::collections::HashMap;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::request::ResultCb;

/// 64-bit request ID sequence: each ID is the previous one plus a
/// uniformly-random positive delta. Callers rely on uniqueness within the
/// process, not on ordering. IDs are never zero, since zero on the wire
/// means "no correlation expected".
pub(crate) struct IdSequence {
    next: i64,
    rng: SmallRng,
}

impl IdSequence {
    pub fn new() -> Self {
        Self {
            next: 0,
            rng: SmallRng::from_entropy(),
        }
    }

    pub fn next_id(&mut self) -> i64 {
        loop {
            let delta = self.rng.gen_range(1..=i64::from(u32::MAX));
            self.next = self.next.wrapping_add(delta);
            if self.next != 0 {
                return self.next;
            }
        }
    }
}

/// Correlates outgoing request IDs with their response callbacks.
///
/// Entries are registered only once the engine commits to the send (direct
/// send succeeded or the frame was queued), and removed when the matching
/// response arrives.
#[derive(Default)]
pub(crate) struct PendingTable {
    entries: HashMap<i64, ResultCb>,
}

impl PendingTable {
    pub fn register(&mut self, id: i64, cb: ResultCb) {
        self.entries.insert(id, cb);
    }

    /// Remove and return the callback for `id`. Unknown IDs yield `None`.
    pub fn take(&mut self, id: i64) -> Option<ResultCb> {
        self.entries.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
