use std::cmp::Ordering;
use std::collections::BinaryHeap;

use bytes::Bytes;

use crate::command::{Command, CommandError, Reply, ReplySender};

/// A queued command with its encoded wire bytes and correlator bookkeeping.
pub(crate) struct Pending {
    pub(crate) command: Command,
    pub(crate) wire: Bytes,
    pub(crate) retries_remaining: u32,
    pub(crate) attempts: u32,
    reply: Option<ReplySender>,
}

impl Pending {
    pub(crate) fn new(command: Command, wire: Bytes, reply: ReplySender) -> Self {
        Self {
            retries_remaining: command.retries(),
            command,
            wire,
            attempts: 0,
            reply: Some(reply),
        }
    }

    /// Complete the caller's future. Later calls are no-ops.
    pub(crate) fn resolve(&mut self, result: Result<Reply, CommandError>) {
        if let Some(reply) = self.reply.take() {
            // The caller may have dropped its handle; that is not an error.
            let _ = reply.send(result);
        }
    }
}

struct Entry {
    seq: i64,
    pending: Pending,
}

impl Entry {
    fn key(&self) -> (crate::command::Priority, std::cmp::Reverse<i64>) {
        (self.pending.command.priority(), std::cmp::Reverse(self.seq))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Max-heap on priority, FIFO within a priority band.
///
/// Back insertions take increasing sequence numbers, front insertions
/// decreasing negative ones, so a retried command goes ahead of its band.
#[derive(Default)]
pub(crate) struct CommandQueue {
    heap: BinaryHeap<Entry>,
    back_seq: i64,
    front_seq: i64,
}

impl CommandQueue {
    pub(crate) fn push_back(&mut self, pending: Pending) {
        self.back_seq += 1;
        self.heap.push(Entry {
            seq: self.back_seq,
            pending,
        });
    }

    pub(crate) fn push_front(&mut self, pending: Pending) {
        self.front_seq -= 1;
        self.heap.push(Entry {
            seq: self.front_seq,
            pending,
        });
    }

    /// Highest-ranked command accepted by `eligible`, without removing it.
    pub(crate) fn peek_matching(&self, eligible: impl Fn(&Command) -> bool) -> Option<&Command> {
        match self.heap.peek() {
            Some(top) if eligible(&top.pending.command) => Some(&top.pending.command),
            Some(_) => self
                .heap
                .iter()
                .filter(|entry| eligible(&entry.pending.command))
                .max()
                .map(|entry| &entry.pending.command),
            None => None,
        }
    }

    /// Remove and return the highest-ranked command accepted by `eligible`.
    pub(crate) fn pop_matching(&mut self, eligible: impl Fn(&Command) -> bool) -> Option<Pending> {
        if self
            .heap
            .peek()
            .is_some_and(|top| eligible(&top.pending.command))
        {
            return self.heap.pop().map(|entry| entry.pending);
        }
        let mut skipped = Vec::new();
        let mut found = None;
        while let Some(entry) = self.heap.pop() {
            if eligible(&entry.pending.command) {
                found = Some(entry.pending);
                break;
            }
            skipped.push(entry);
        }
        self.heap.extend(skipped);
        found
    }

    /// Remove every command accepted by `matches`, in dequeue order.
    pub(crate) fn remove_where(&mut self, matches: impl Fn(&Command) -> bool) -> Vec<Pending> {
        self.remove_pending_where(|pending| matches(&pending.command))
    }

    /// Like [`remove_where`](Self::remove_where) but sees the bookkeeping too.
    pub(crate) fn remove_pending_where(
        &mut self,
        matches: impl Fn(&Pending) -> bool,
    ) -> Vec<Pending> {
        let (removed, kept): (Vec<Entry>, Vec<Entry>) = std::mem::take(&mut self.heap)
            .into_vec()
            .into_iter()
            .partition(|entry| matches(&entry.pending));
        self.heap = BinaryHeap::from(kept);
        let mut removed = removed;
        removed.sort_by(|a, b| b.cmp(a));
        removed.into_iter().map(|entry| entry.pending).collect()
    }

    pub(crate) fn drain(&mut self) -> Vec<Pending> {
        self.remove_where(|_| true)
    }

    pub(crate) fn contains(&self, matches: impl Fn(&Command) -> bool) -> bool {
        self.heap.iter().any(|entry| matches(&entry.pending.command))
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandHandle, Origin};

    fn pending(name: &str, priority: i32) -> Pending {
        let (tx, _handle) = CommandHandle::channel();
        let command = Command::new(name, Bytes::new()).with_priority(priority);
        Pending::new(command, Bytes::new(), tx)
    }

    fn names(pendings: Vec<Pending>) -> Vec<String> {
        pendings
            .into_iter()
            .map(|p| p.command.name().to_string())
            .collect()
    }

    #[test]
    fn priority_then_fifo() {
        let mut queue = CommandQueue::default();
        queue.push_back(pending("a", 0));
        queue.push_back(pending("b", 5));
        queue.push_back(pending("c", 5));

        assert_eq!(names(queue.drain()), vec!["b", "c", "a"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn front_insertion_leads_its_band_only() {
        let mut queue = CommandQueue::default();
        queue.push_back(pending("normal", 0));
        queue.push_back(pending("high", 5));
        queue.push_front(pending("retry", 0));

        let order: Vec<String> = std::iter::from_fn(|| queue.pop_matching(|_| true))
            .map(|p| p.command.name().to_string())
            .collect();
        assert_eq!(order, vec!["high", "retry", "normal"]);
    }

    #[test]
    fn pop_matching_skips_ineligible() {
        let mut queue = CommandQueue::default();
        queue.push_back(pending("user", 5));
        let (tx, _handle) = CommandHandle::channel();
        queue.push_back(Pending::new(
            Command::new("login", Bytes::new()).with_origin(Origin::Handshake),
            Bytes::new(),
            tx,
        ));

        let handshake_only = |c: &Command| c.origin() == &Origin::Handshake;
        assert_eq!(queue.peek_matching(handshake_only).unwrap().name(), "login");
        let popped = queue.pop_matching(handshake_only).unwrap();
        assert_eq!(popped.command.name(), "login");
        assert!(queue.pop_matching(handshake_only).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn remove_where_keeps_the_rest() {
        let mut queue = CommandQueue::default();
        queue.push_back(pending("move", 0));
        queue.push_back(pending("zoom", 0));
        queue.push_back(pending("move", 1));

        let removed = queue.remove_where(|c| c.name() == "move");
        assert_eq!(removed.len(), 2);
        assert!(queue.contains(|c| c.name() == "zoom"));
        assert!(!queue.contains(|c| c.name() == "move"));
    }
}
