//! Delay-and-merge queue for incoming journal entries.
//!
//! Some entry kinds tend to arrive in bursts (a run of `UnderAttack` events,
//! a batch of signal discoveries). Such entries are held back for a short
//! delay so that companions arriving within it can be fused into a single
//! delivered entry.
//!
//! The merger is plain single-threaded state. It is owned by the publish
//! context, which also drives its timer: the publish loop sleeps until
//! [`JournalMerger::deadline`] and then calls [`JournalMerger::fire_if_due`],
//! so submit, flush and timer expiry can never overlap.

use crate::journal::JournalEntry;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Decides how long entries wait and whether two entries fuse.
pub trait MergePolicy: Send + Sync {
    /// Delay to hold `entry` back for companions. Zero means deliver now.
    fn merge_delay(&self, entry: &JournalEntry) -> Duration;

    /// Tries to fold `entry` into `candidate`. Returns true on success, in
    /// which case `entry` is dropped.
    fn merge(&self, candidate: &mut JournalEntry, entry: &JournalEntry) -> bool;
}

/// Merges consecutive entries of the same kind and commander, for kinds that
/// have a configured delay.
#[derive(Debug, Clone, Default)]
pub struct KindMergePolicy {
    delays: HashMap<String, Duration>,
}

impl KindMergePolicy {
    /// Creates a policy from per-kind delays.
    pub fn new(delays: HashMap<String, Duration>) -> Self {
        Self { delays }
    }
}

impl MergePolicy for KindMergePolicy {
    fn merge_delay(&self, entry: &JournalEntry) -> Duration {
        self.delays.get(&entry.kind).copied().unwrap_or(Duration::ZERO)
    }

    fn merge(&self, candidate: &mut JournalEntry, entry: &JournalEntry) -> bool {
        if candidate.kind != entry.kind
            || candidate.commander_id != entry.commander_id
            || !self.delays.contains_key(&entry.kind)
        {
            return false;
        }

        candidate.repeat += 1 + entry.repeat;
        if entry.detail.is_some() {
            candidate.detail = entry.detail.clone();
        }
        true
    }
}

/// FIFO of held-back entries plus a single re-armable deadline.
pub struct JournalMerger {
    policy: Box<dyn MergePolicy>,
    queue: VecDeque<JournalEntry>,
    deadline: Option<Instant>,
}

impl JournalMerger {
    /// Creates an empty merger.
    pub fn new(policy: Box<dyn MergePolicy>) -> Self {
        Self {
            policy,
            queue: VecDeque::new(),
            deadline: None,
        }
    }

    /// Accepts a new entry.
    ///
    /// Entries with a delay are queued and (re)arm the deadline. Entries
    /// without one disarm it and flush the whole queue, themselves included,
    /// before returning.
    pub fn submit<F>(&mut self, entry: JournalEntry, now: Instant, finalize: F)
    where
        F: FnMut(JournalEntry),
    {
        let delay = self.policy.merge_delay(&entry);
        if delay > Duration::ZERO {
            tracing::trace!(kind = %entry.kind, ?delay, "holding journal entry");
            self.queue.push_back(entry);
            self.deadline = Some(now + delay);
        } else {
            self.deadline = None;
            self.queue.push_back(entry);
            self.flush(finalize);
        }
    }

    /// Drains the queue in order, fusing runs the policy accepts.
    pub fn flush<F>(&mut self, mut finalize: F)
    where
        F: FnMut(JournalEntry),
    {
        let mut candidate: Option<JournalEntry> = None;

        while let Some(entry) = self.queue.pop_front() {
            let merged = match candidate.as_mut() {
                Some(current) => self.policy.merge(current, &entry),
                None => false,
            };
            if !merged {
                if let Some(done) = candidate.replace(entry) {
                    finalize(done);
                }
            }
        }

        if let Some(done) = candidate {
            finalize(done);
        }
    }

    /// Flushes if the armed deadline has passed. Returns true if it fired.
    pub fn fire_if_due<F>(&mut self, now: Instant, finalize: F) -> bool
    where
        F: FnMut(JournalEntry),
    {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                self.flush(finalize);
                true
            }
            _ => false,
        }
    }

    /// When the armed timer expires, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancels the armed timer without flushing.
    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    /// Number of entries waiting.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy() -> Box<dyn MergePolicy> {
        let delays = [("UnderAttack".to_string(), Duration::from_millis(100))]
            .into_iter()
            .collect();
        Box::new(KindMergePolicy::new(delays))
    }

    fn entry(id: u64, kind: &str) -> JournalEntry {
        JournalEntry::new(id, kind, 1)
    }

    #[test]
    fn zero_delay_finalizes_before_returning() {
        let mut merger = JournalMerger::new(policy());
        let mut finalized = Vec::new();

        merger.submit(entry(1, "FSDJump"), Instant::now(), |e| finalized.push(e));

        assert_eq!(finalized.len(), 1);
        assert_eq!(finalized[0].id, 1);
        assert_eq!(merger.pending(), 0);
        assert!(merger.deadline().is_none());
    }

    #[test]
    fn companion_within_delay_is_absorbed() {
        let mut merger = JournalMerger::new(policy());
        let mut finalized = Vec::new();
        let start = Instant::now();

        merger.submit(entry(1, "UnderAttack"), start, |e| finalized.push(e));
        merger.submit(
            entry(2, "UnderAttack"),
            start + Duration::from_millis(50),
            |e| finalized.push(e),
        );
        assert!(finalized.is_empty());

        let fired = merger.fire_if_due(start + Duration::from_millis(200), |e| finalized.push(e));
        assert!(fired);
        assert_eq!(finalized.len(), 1);
        assert_eq!(finalized[0].id, 1);
        assert_eq!(finalized[0].repeat, 1);
    }

    #[test]
    fn lone_delayed_entry_fires_at_deadline() {
        let mut merger = JournalMerger::new(policy());
        let mut finalized = Vec::new();
        let start = Instant::now();

        merger.submit(entry(1, "UnderAttack"), start, |e| finalized.push(e));
        assert_eq!(merger.deadline(), Some(start + Duration::from_millis(100)));

        assert!(!merger.fire_if_due(start + Duration::from_millis(99), |e| finalized.push(e)));
        assert!(finalized.is_empty());

        assert!(merger.fire_if_due(start + Duration::from_millis(100), |e| finalized.push(e)));
        assert_eq!(finalized.len(), 1);
        assert!(merger.deadline().is_none());
    }

    #[test]
    fn rearm_replaces_previous_deadline() {
        let mut merger = JournalMerger::new(policy());
        let start = Instant::now();

        merger.submit(entry(1, "UnderAttack"), start, |_| {});
        merger.submit(entry(2, "UnderAttack"), start + Duration::from_millis(80), |_| {});

        assert_eq!(merger.deadline(), Some(start + Duration::from_millis(180)));
    }

    #[test]
    fn undelayed_entry_flushes_held_entries_first() {
        let mut merger = JournalMerger::new(policy());
        let mut finalized = Vec::new();
        let now = Instant::now();

        merger.submit(entry(1, "UnderAttack"), now, |e| finalized.push(e));
        merger.submit(entry(2, "UnderAttack"), now, |e| finalized.push(e));
        merger.submit(entry(3, "Docked"), now, |e| finalized.push(e));

        let ids: Vec<u64> = finalized.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(finalized[0].repeat, 1);
        assert!(merger.deadline().is_none());
    }

    #[test]
    fn different_commanders_do_not_merge() {
        let policy = policy();
        let mut a = JournalEntry::new(1, "UnderAttack", 1);
        let b = JournalEntry::new(2, "UnderAttack", 2);
        assert!(!policy.merge(&mut a, &b));
        assert_eq!(a.repeat, 0);
    }

    proptest! {
        #[test]
        fn delivery_preserves_arrival_order(kinds in proptest::collection::vec(0u8..3, 1..40)) {
            let mut merger = JournalMerger::new(policy());
            let mut finalized = Vec::new();
            let now = Instant::now();

            for (i, k) in kinds.iter().enumerate() {
                let kind = match k {
                    0 => "UnderAttack",
                    1 => "FSDJump",
                    _ => "Scan",
                };
                merger.submit(entry(i as u64, kind), now, |e| finalized.push(e));
            }
            merger.flush(|e| finalized.push(e));

            let ids: Vec<u64> = finalized.iter().map(|e| e.id).collect();
            prop_assert!(ids.windows(2).all(|w| w[0] < w[1]));

            let accounted: u64 = finalized.iter().map(|e| 1 + u64::from(e.repeat)).sum();
            prop_assert_eq!(accounted, kinds.len() as u64);
        }
    }
}
