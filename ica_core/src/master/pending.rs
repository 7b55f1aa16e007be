//! Pending-correlation table and deadline heap.
//!
//! One entry per outstanding reference. Deadlines live in a min-heap next
//! to the table; entries resolved by an acknowledgment or a cancel are not
//! removed from the heap but skipped when they surface (the heap entry no
//! longer matches a pending entry with the same deadline).

use ica_common::reference::{ChannelId, Reference};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

/// Who issued a pending command, and so who hears about its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Master,
    Worker(ChannelId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub target: ChannelId,
    pub origin: Origin,
    pub name: &'static str,
    pub issued_at: Instant,
    pub deadline: Instant,
}

impl PendingEntry {
    pub fn new(target: ChannelId, origin: Origin, name: &'static str, timeout: Duration) -> Self {
        let issued_at = Instant::now();
        Self {
            target,
            origin,
            name,
            issued_at,
            deadline: issued_at + timeout,
        }
    }

    /// True if the entry was issued by, or sent to, `channel`.
    pub fn touches(&self, channel: ChannelId) -> bool {
        self.target == channel || self.origin == Origin::Worker(channel)
    }
}

#[derive(Debug, Default)]
pub struct PendingTable {
    entries: HashMap<Reference, PendingEntry>,
    deadlines: BinaryHeap<Reverse<(Instant, Reference)>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pending entry. Returns `false`, leaving the table untouched,
    /// when the reference is already pending.
    pub fn insert(&mut self, reference: Reference, entry: PendingEntry) -> bool {
        if self.entries.contains_key(&reference) {
            return false;
        }
        self.deadlines.push(Reverse((entry.deadline, reference)));
        self.entries.insert(reference, entry);
        true
    }

    /// Remove and return the entry. `None` for unknown, already-resolved
    /// or cancelled references.
    pub fn resolve(&mut self, reference: Reference) -> Option<PendingEntry> {
        self.entries.remove(&reference)
    }

    #[inline]
    pub fn contains(&self, reference: Reference) -> bool {
        self.entries.contains_key(&reference)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// References whose deadline is at or before `now`, earliest first.
    /// The entries stay in the table; the caller resolves them.
    pub fn expired(&mut self, now: Instant) -> Vec<(Reference, &'static str)> {
        let mut out = Vec::new();
        while let Some(Reverse((deadline, reference))) = self.deadlines.peek().copied() {
            if deadline > now {
                break;
            }
            self.deadlines.pop();
            if let Some(entry) = self.entries.get(&reference) {
                if entry.deadline == deadline {
                    out.push((reference, entry.name));
                }
            }
        }
        out
    }

    /// Earliest live deadline. Stale heap entries on top are discarded.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((deadline, reference))) = self.deadlines.peek().copied() {
            match self.entries.get(&reference) {
                Some(entry) if entry.deadline == deadline => return Some(deadline),
                _ => {
                    self.deadlines.pop();
                }
            }
        }
        None
    }

    /// Remove every entry touching `channel`.
    pub fn drain_channel(&mut self, channel: ChannelId) -> Vec<(Reference, PendingEntry)> {
        let refs: Vec<Reference> = self
            .entries
            .iter()
            .filter(|(_, e)| e.touches(channel))
            .map(|(r, _)| *r)
            .collect();
        let mut drained: Vec<(Reference, PendingEntry)> = refs
            .into_iter()
            .filter_map(|r| self.entries.remove(&r).map(|e| (r, e)))
            .collect();
        drained.sort_by_key(|(r, _)| *r);
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(target: u16, timeout_ms: u64) -> PendingEntry {
        PendingEntry::new(ChannelId(target), Origin::Master, "CmdTest", Duration::from_millis(timeout_ms))
    }

    #[test]
    fn insert_resolve_once() {
        let mut t = PendingTable::new();
        let r = Reference::from_raw(1);
        assert!(t.insert(r, entry(1, 100)));
        assert!(!t.insert(r, entry(1, 100)));
        assert_eq!(t.len(), 1);
        assert!(t.resolve(r).is_some());
        assert!(t.resolve(r).is_none());
        assert!(t.is_empty());
    }

    #[test]
    fn expired_in_deadline_order() {
        let mut t = PendingTable::new();
        t.insert(Reference::from_raw(1), entry(1, 30));
        t.insert(Reference::from_raw(2), entry(1, 10));
        t.insert(Reference::from_raw(3), entry(1, 10_000));
        let later = Instant::now() + Duration::from_millis(100);
        let refs: Vec<u64> = t.expired(later).into_iter().map(|(r, _)| r.get()).collect();
        assert_eq!(refs, vec![2, 1]);
        // Still pending until resolved by the caller.
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn resolved_entries_never_expire() {
        let mut t = PendingTable::new();
        let r = Reference::from_raw(5);
        t.insert(r, entry(1, 0));
        t.resolve(r);
        assert!(t.expired(Instant::now() + Duration::from_secs(1)).is_empty());
        assert_eq!(t.next_deadline(), None);
    }

    #[test]
    fn next_deadline_skips_stale() {
        let mut t = PendingTable::new();
        t.insert(Reference::from_raw(1), entry(1, 5));
        let later = entry(1, 500);
        let second = later.deadline;
        t.insert(Reference::from_raw(2), later);
        t.resolve(Reference::from_raw(1));
        assert_eq!(t.next_deadline(), Some(second));
    }

    #[test]
    fn drain_channel_takes_target_and_origin() {
        let mut t = PendingTable::new();
        t.insert(Reference::from_raw(1), entry(1, 100));
        t.insert(Reference::from_raw(2), entry(2, 100));
        t.insert(
            Reference::from_raw(3),
            PendingEntry::new(ChannelId(2), Origin::Worker(ChannelId(1)), "CmdTest", Duration::from_secs(1)),
        );
        let drained: Vec<u64> = t.drain_channel(ChannelId(1)).into_iter().map(|(r, _)| r.get()).collect();
        assert_eq!(drained, vec![1, 3]);
        assert_eq!(t.len(), 1);
    }
}
