//! Deciding which change feed sequence is safe to checkpoint.
//!
//! Work items complete out of order, so "the sequence of whatever just
//! finished" is not a safe thing to persist: if 101 finishes before 100, a
//! naive writer stores 101 and then 100, moving the checkpoint backwards.
//! [`CursorTracker`] sits between completions and the checkpoint and only
//! ever hands out sequences that move it forward.

use regsync_registry::Cursor;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommitPolicy {
    /// Commit `s` only once every registered sequence at or below `s` has
    /// completed. Never skips a change that reached the pool; after a crash,
    /// up to one in-flight window of changes is processed again. Sequences
    /// that were never registered do not hold it back.
    #[default]
    Ordered,
    /// Commit any completed sequence above the current checkpoint. Never
    /// moves backwards, but a crash can lose changes that were still in
    /// flight below the committed sequence.
    MaxSeen,
}

/// Tracks in-flight sequences and yields the next checkpoint to persist.
///
/// Every sequence must be [`register()`](Self::register)ed before its work is
/// submitted, and then either [`complete()`](Self::complete)d or
/// [`abandon()`](Self::abandon)ed exactly once.
#[derive(Debug)]
pub struct CursorTracker {
    policy: CommitPolicy,
    committed: Option<u64>,
    /// Registered and not yet finished, with a count for duplicate sequences.
    pending: BTreeMap<u64, usize>,
    /// Finished, but waiting on something lower before it can be committed.
    completed: BTreeSet<u64>,
    /// Never going to finish; nothing at or above these may be committed.
    abandoned: BTreeSet<u64>,
}
impl CursorTracker {
    pub fn new(policy: CommitPolicy, start: Cursor) -> Self {
        Self {
            policy,
            committed: start.seq(),
            pending: BTreeMap::new(),
            completed: BTreeSet::new(),
            abandoned: BTreeSet::new(),
        }
    }

    pub fn policy(&self) -> CommitPolicy {
        self.policy
    }

    /// Highest sequence handed out for committing so far, or the start.
    pub fn committed(&self) -> Option<u64> {
        self.committed
    }

    /// Number of registered sequences that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.pending.values().sum()
    }

    pub fn register(&mut self, seq: u64) {
        *self.pending.entry(seq).or_default() += 1;
    }

    /// Record that the work for `seq` finished, successfully or not.
    ///
    /// Returns the sequence to persist if the checkpoint can move forward.
    pub fn complete(&mut self, seq: u64) -> Option<u64> {
        if !self.release(seq) {
            tracing::warn!(seq, "Completion for a sequence that was never registered");
            return None;
        }
        match self.policy {
            CommitPolicy::MaxSeen => self.advance(seq),
            CommitPolicy::Ordered => {
                self.completed.insert(seq);
                self.flush()
            },
        }
    }

    /// Record that the work for `seq` was never submitted.
    ///
    /// Under [`Ordered`](CommitPolicy::Ordered) this permanently holds the
    /// checkpoint below `seq`, so the change is picked up again on restart.
    pub fn abandon(&mut self, seq: u64) {
        if self.release(seq) {
            self.abandoned.insert(seq);
        }
    }

    fn release(&mut self, seq: u64) -> bool {
        let Some(count) = self.pending.get_mut(&seq) else {
            return false;
        };
        *count -= 1;
        if *count == 0 {
            self.pending.remove(&seq);
        }
        true
    }

    /// Commit the highest completed sequence below everything still
    /// outstanding.
    fn flush(&mut self) -> Option<u64> {
        let barrier = [self.pending.keys().next(), self.abandoned.first()].into_iter().flatten().min().copied();
        let ready = match barrier {
            Some(barrier) => {
                let blocked = self.completed.split_off(&barrier);
                std::mem::replace(&mut self.completed, blocked)
            },
            None => std::mem::take(&mut self.completed),
        };
        self.advance(ready.last().copied()?)
    }

    fn advance(&mut self, seq: u64) -> Option<u64> {
        if self.committed.is_some_and(|committed| seq <= committed) {
            return None;
        }
        self.committed = Some(seq);
        Some(seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn tracker(policy: CommitPolicy, registered: &[u64]) -> CursorTracker {
        let mut tracker = CursorTracker::new(policy, Cursor::Live);
        for seq in registered {
            tracker.register(*seq);
        }
        tracker
    }

    /// Feed completions in `order` and collect what would be persisted.
    fn commits(tracker: &mut CursorTracker, order: &[u64]) -> Vec<u64> {
        order.iter().filter_map(|seq| tracker.complete(*seq)).collect()
    }

    #[test]
    fn test_last_write_wins_would_regress() {
        // Persisting each completion as it arrives moves the checkpoint back.
        let order = [101, 100];
        let naive: Vec<u64> = order.to_vec();
        assert!(naive.windows(2).any(|w| w[1] < w[0]));

        for policy in [CommitPolicy::Ordered, CommitPolicy::MaxSeen] {
            let mut tracker = tracker(policy, &[100, 101]);
            let persisted = commits(&mut tracker, &order);
            assert!(persisted.windows(2).all(|w| w[1] > w[0]), "{policy:?} regressed: {persisted:?}");
        }
    }

    #[test]
    fn test_ordered_waits_for_lower_sequences() {
        let mut tracker = tracker(CommitPolicy::Ordered, &[100, 101]);
        assert_eq!(tracker.complete(101), None);
        assert_eq!(tracker.committed(), None);
        assert_eq!(tracker.complete(100), Some(101));
        assert_eq!(tracker.committed(), Some(101));
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn test_max_seen_commits_immediately() {
        let mut tracker = tracker(CommitPolicy::MaxSeen, &[100, 101]);
        assert_eq!(tracker.complete(101), Some(101));
        assert_eq!(tracker.complete(100), None);
        assert_eq!(tracker.committed(), Some(101));
    }

    #[rstest]
    #[case(CommitPolicy::Ordered, &[1, 2, 3], &[1, 2, 3])]
    #[case(CommitPolicy::Ordered, &[3, 2, 1], &[3])]
    #[case(CommitPolicy::Ordered, &[2, 1, 3], &[2, 3])]
    #[case(CommitPolicy::MaxSeen, &[3, 2, 1], &[3])]
    #[case(CommitPolicy::MaxSeen, &[2, 1, 3], &[2, 3])]
    fn test_commit_order(#[case] policy: CommitPolicy, #[case] order: &[u64], #[case] expected: &[u64]) {
        let mut tracker = tracker(policy, &[1, 2, 3]);
        assert_eq!(commits(&mut tracker, order), expected);
    }

    #[test]
    fn test_duplicate_sequences() {
        // Several changes can share a sequence; all of them have to finish.
        let mut tracker = tracker(CommitPolicy::Ordered, &[5, 5, 6]);
        assert_eq!(tracker.complete(5), None);
        assert_eq!(tracker.complete(6), None);
        assert_eq!(tracker.complete(5), Some(6));
    }

    #[test]
    fn test_never_below_start() {
        let mut tracker = CursorTracker::new(CommitPolicy::Ordered, Cursor::Seq(50));
        tracker.register(40);
        tracker.register(60);
        assert_eq!(tracker.complete(40), None);
        assert_eq!(tracker.complete(60), Some(60));
        assert_eq!(tracker.committed(), Some(60));
    }

    #[test]
    fn test_abandoned_holds_ordered_checkpoint() {
        let mut tracker = tracker(CommitPolicy::Ordered, &[1, 2, 3]);
        assert_eq!(tracker.complete(1), Some(1));
        tracker.abandon(2);
        assert_eq!(tracker.complete(3), None);
        assert_eq!(tracker.committed(), Some(1));
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn test_ordered_passes_sequences_never_registered() {
        // 2 never reached the pool, so nothing waits for it.
        let mut tracker = tracker(CommitPolicy::Ordered, &[1, 3]);
        assert_eq!(tracker.complete(3), None);
        assert_eq!(tracker.complete(1), Some(3));
        assert_eq!(tracker.committed(), Some(3));
    }

    #[test]
    fn test_unregistered_completion_is_ignored() {
        let mut tracker = tracker(CommitPolicy::MaxSeen, &[]);
        assert_eq!(tracker.complete(9), None);
        assert_eq!(tracker.committed(), None);
    }

    #[test]
    fn test_policy_deserializes_from_config() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: CommitPolicy,
        }
        let wrapper: Wrapper = serde_json::from_str(r#"{"policy": "max-seen"}"#).unwrap();
        assert_eq!(wrapper.policy, CommitPolicy::MaxSeen);
    }
}
