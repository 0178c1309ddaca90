//! Bounded FIFO of outgoing frames no channel could take at send time.
//!
//! The queue is FIFO as a whole, not per destination: a persistently-busy
//! channel at the head can starve entries behind it. Callers that need
//! fairness issue their own flow control.

use rpcmux_core::ChannelId;

#[derive(Debug)]
pub(crate) struct QueueEntry {
    /// Re-resolved at flush time when no channel is pinned.
    pub dst: String,
    /// Set when the frame must leave through one specific channel
    /// (responses and broadcast-less retries to an on-demand channel).
    pub pin: Option<ChannelId>,
    pub frame: String,
}

pub(crate) struct OutboundQueue {
    entries: Vec<QueueEntry>,
    capacity: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Append an entry; hands it back when the queue is at capacity.
    pub fn enqueue(&mut self, entry: QueueEntry) -> Result<(), QueueEntry> {
        if self.entries.len() >= self.capacity {
            return Err(entry);
        }
        tracing::debug!(len = entry.frame.len(), frame = %entry.frame, "queued frame");
        self.entries.push(entry);
        Ok(())
    }

    /// Take the entry at `idx` out for a send attempt.
    pub fn remove(&mut self, idx: usize) -> QueueEntry {
        self.entries.remove(idx)
    }

    /// Put an unsent entry back where it was.
    pub fn insert(&mut self, idx: usize, entry: QueueEntry) {
        self.entries.insert(idx, entry);
    }

    /// Drop every entry pinned to a destroyed channel.
    pub fn purge_pinned(&mut self, channel: ChannelId) {
        self.entries.retain(|e| e.pin != Some(channel));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(dst: &str, pin: Option<ChannelId>) -> QueueEntry {
        QueueEntry {
            dst: dst.to_string(),
            pin,
            frame: String::from("{}"),
        }
    }

    #[test]
    fn bounded() {
        let mut q = OutboundQueue::new(2);
        assert!(q.enqueue(entry("a", None)).is_ok());
        assert!(q.enqueue(entry("b", None)).is_ok());
        let rejected = q.enqueue(entry("c", None));
        assert!(rejected.is_err());
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn fifo_order() {
        let mut q = OutboundQueue::new(4);
        q.enqueue(entry("a", None)).unwrap();
        q.enqueue(entry("b", None)).unwrap();
        assert_eq!(q.remove(0).dst, "a");
        assert_eq!(q.remove(0).dst, "b");
    }

    #[test]
    fn insert_restores_position() {
        let mut q = OutboundQueue::new(4);
        q.enqueue(entry("a", None)).unwrap();
        q.enqueue(entry("b", None)).unwrap();
        let e = q.remove(0);
        q.insert(0, e);
        assert_eq!(q.remove(0).dst, "a");
    }

    #[test]
    fn purge_pinned_removes_only_matching() {
        let mut q = OutboundQueue::new(4);
        q.enqueue(entry("a", Some(1))).unwrap();
        q.enqueue(entry("b", None)).unwrap();
        q.enqueue(entry("c", Some(2))).unwrap();
        q.purge_pinned(1);
        assert_eq!(q.len(), 2);
        assert_eq!(q.remove(0).dst, "b");
        assert_eq!(q.remove(0).dst, "c");
    }
}
