//! Cooperative timers
//!
//! A deadline-ordered set of pending continuations. Nothing here sleeps:
//! the owner calls [`Scheduler::take_due`] from its tick and acts on whatever
//! has expired. Every entry is addressable by a [`TimerToken`] so it can be
//! cancelled before it fires.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// Handle to a scheduled entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

/// Pending timers carrying an event of type `E`
#[derive(Debug)]
pub struct Scheduler<E> {
    next_id: u64,
    /// Ordered by deadline, ties broken by scheduling order
    pending: BTreeMap<(Instant, u64), E>,
    deadlines: HashMap<u64, Instant>,
}

impl<E> Scheduler<E> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            pending: BTreeMap::new(),
            deadlines: HashMap::new(),
        }
    }

    /// Schedule `event` to fire at `deadline`
    pub fn schedule_at(&mut self, deadline: Instant, event: E) -> TimerToken {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert((deadline, id), event);
        self.deadlines.insert(id, deadline);
        TimerToken(id)
    }

    /// Schedule `event` to fire `delay` after `now`
    pub fn schedule_after(&mut self, now: Instant, delay: Duration, event: E) -> TimerToken {
        self.schedule_at(now + delay, event)
    }

    /// Cancel a pending entry, returning its event if it had not fired yet
    pub fn cancel(&mut self, token: TimerToken) -> Option<E> {
        let deadline = self.deadlines.remove(&token.0)?;
        self.pending.remove(&(deadline, token.0))
    }

    /// Remove and return every entry whose deadline is at or before `now`
    pub fn take_due(&mut self, now: Instant) -> Vec<(TimerToken, E)> {
        let mut due = Vec::new();
        while let Some(entry) = self.pending.first_entry() {
            let (deadline, id) = *entry.key();
            if deadline > now {
                break;
            }
            let event = entry.remove();
            self.deadlines.remove(&id);
            due.push((TimerToken(id), event));
        }
        due
    }

    pub fn is_pending(&self, token: TimerToken) -> bool {
        self.deadlines.contains_key(&token.0)
    }

    pub fn deadline(&self, token: TimerToken) -> Option<Instant> {
        self.deadlines.get(&token.0).copied()
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.keys().next().map(|(deadline, _)| *deadline)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop every pending entry
    pub fn clear(&mut self) {
        self.pending.clear();
        self.deadlines.clear();
    }
}

impl<E> Default for Scheduler<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_in_deadline_order() {
        let start = Instant::now();
        let mut timers = Scheduler::new();
        timers.schedule_after(start, Duration::from_millis(30), "c");
        timers.schedule_after(start, Duration::from_millis(10), "a");
        timers.schedule_after(start, Duration::from_millis(20), "b");

        assert!(timers.take_due(start).is_empty());

        let due: Vec<_> = timers
            .take_due(start + Duration::from_millis(20))
            .into_iter()
            .map(|(_, e)| e)
            .collect();
        assert_eq!(due, vec!["a", "b"]);
        assert_eq!(timers.len(), 1);
        assert_eq!(timers.next_deadline(), Some(start + Duration::from_millis(30)));
    }

    #[test]
    fn test_cancel_prevents_firing() {
        let start = Instant::now();
        let mut timers = Scheduler::new();
        let token = timers.schedule_after(start, Duration::from_millis(5), 1u32);
        assert!(timers.is_pending(token));

        assert_eq!(timers.cancel(token), Some(1));
        assert!(!timers.is_pending(token));
        assert_eq!(timers.cancel(token), None);
        assert!(timers.take_due(start + Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn test_same_deadline_keeps_schedule_order() {
        let start = Instant::now();
        let mut timers = Scheduler::new();
        let first = timers.schedule_at(start, 1);
        let second = timers.schedule_at(start, 2);

        let due = timers.take_due(start);
        assert_eq!(due, vec![(first, 1), (second, 2)]);
        assert!(timers.is_empty());
    }
}
