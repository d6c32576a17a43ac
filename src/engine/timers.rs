//! Cancellable timers keyed by identity.
//!
//! Every timer has a unique `TimerKey`. Scheduling a key again replaces the
//! previous deadline and cancelling removes it; the heap keeps stale entries
//! around and `pop_due` skips any whose generation no longer matches.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Instant;

use super::AttemptId;

/// Identity of one pending timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum TimerKey {
    /// All keys of a parallel group must be down before this fires.
    ChordWindow { attempt: AttemptId },
    /// The current press (or group) has been held for the long-press delay.
    LongPress { attempt: AttemptId },
    /// The gap allowed between the two clicks of a double press.
    DoublePress { attempt: AttemptId },
    /// The gap allowed before the next key of a sequence goes down.
    SequenceStep { attempt: AttemptId },
    /// Resume a key map's action list after `delay_before_next_action`.
    ActionChain { slot: usize },
    /// Next dispatch of a repeating action.
    Repeat { slot: usize, action: usize },
}

/// Orders by deadline, then by scheduling order. The generation doubles as
/// the scheduling sequence number.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Entry {
    at: Instant,
    generation: u64,
    key: TimerKey,
}

#[derive(Debug, Default)]
pub(crate) struct TimerQueue {
    heap: BinaryHeap<Reverse<Entry>>,
    live: HashMap<TimerKey, u64>,
    next_generation: u64,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn schedule(&mut self, key: TimerKey, at: Instant) {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.live.insert(key, generation);
        self.heap.push(Reverse(Entry {
            at,
            generation,
            key,
        }));
    }

    pub(crate) fn cancel(&mut self, key: TimerKey) {
        self.live.remove(&key);
    }

    #[cfg(test)]
    pub(crate) fn is_scheduled(&self, key: TimerKey) -> bool {
        self.live.contains_key(&key)
    }

    /// Drops every timer. Stale heap entries can never fire afterwards.
    pub(crate) fn clear(&mut self) {
        self.heap.clear();
        self.live.clear();
    }

    /// Deadline of the earliest live timer.
    pub(crate) fn next_deadline(&mut self) -> Option<Instant> {
        self.purge_stale();
        self.heap.peek().map(|Reverse(e)| e.at)
    }

    /// Removes and returns the earliest live timer due at or before `now`.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<(Instant, TimerKey)> {
        self.purge_stale();
        let due = matches!(self.heap.peek(), Some(Reverse(e)) if e.at <= now);
        if !due {
            return None;
        }
        let Reverse(entry) = self.heap.pop()?;
        self.live.remove(&entry.key);
        Some((entry.at, entry.key))
    }

    fn purge_stale(&mut self) {
        while let Some(Reverse(head)) = self.heap.peek() {
            if self.live.get(&head.key) == Some(&head.generation) {
                break;
            }
            self.heap.pop();
        }
    }
}
