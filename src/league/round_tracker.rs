//! Collects the asynchronous match results of each round.

use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Misuse of a [`RoundTracker`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoundTrackerError {
    /// `start_round` was called twice for the same round.
    #[error("round {0} was already started")]
    AlreadyStarted(u32),
}

struct Entry<R> {
    expected: HashSet<String>,
    results: Vec<R>,
    completed: watch::Sender<bool>,
}

/// Knows when every match of a round has reported.
///
/// Results for rounds that are not (or no longer) tracked are dropped
/// silently: a late report may race the cleanup of its round.
pub struct RoundTracker<R> {
    rounds: Mutex<HashMap<u32, Entry<R>>>,
}

impl<R> Default for RoundTracker<R> {
    fn default() -> Self {
        Self {
            rounds: Mutex::new(HashMap::new()),
        }
    }
}

impl<R: Clone> RoundTracker<R> {
    /// Empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, Entry<R>>> {
        self.rounds.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts tracking `round_id`, complete once every id in `expected` reported.
    pub fn start_round(
        &self,
        round_id: u32,
        expected: impl IntoIterator<Item = String>,
    ) -> Result<(), RoundTrackerError> {
        let mut rounds = self.lock();
        if rounds.contains_key(&round_id) {
            return Err(RoundTrackerError::AlreadyStarted(round_id));
        }
        let expected: HashSet<String> = expected.into_iter().collect();
        let (completed, _) = watch::channel(expected.is_empty());
        debug!(round_id, matches = expected.len(), "round tracked");
        rounds.insert(
            round_id,
            Entry {
                expected,
                results: Vec::new(),
                completed,
            },
        );
        Ok(())
    }

    /// Stores the result of `match_id`.
    ///
    /// Returns false, storing nothing, when the round is not tracked or the
    /// match is not (or no longer) expected.
    pub fn record_result(&self, round_id: u32, match_id: &str, result: R) -> bool {
        let mut rounds = self.lock();
        let Some(entry) = rounds.get_mut(&round_id) else {
            debug!(round_id, match_id, "result for an untracked round dropped");
            return false;
        };
        if !entry.expected.remove(match_id) {
            debug!(round_id, match_id, "unexpected or duplicate result dropped");
            return false;
        }
        entry.results.push(result);
        if entry.expected.is_empty() {
            info!(round_id, "all results received");
            entry.completed.send_replace(true);
        }
        true
    }

    /// Waits until every expected result arrived or `timeout` elapsed, then
    /// returns the results collected so far.
    pub async fn wait_for_round_complete(&self, round_id: u32, timeout: Duration) -> Vec<R> {
        let mut completed = match self.lock().get(&round_id) {
            Some(entry) => entry.completed.subscribe(),
            None => return Vec::new(),
        };

        let in_time = matches!(
            tokio::time::timeout(timeout, completed.wait_for(|done| *done)).await,
            Ok(Ok(_))
        );

        let rounds = self.lock();
        let Some(entry) = rounds.get(&round_id) else {
            return Vec::new();
        };
        if !in_time {
            let mut missing: Vec<&String> = entry.expected.iter().collect();
            missing.sort();
            warn!(round_id, ?missing, "round timed out with missing results");
        }
        entry.results.clone()
    }

    /// Match ids still expected for `round_id`, sorted.
    pub fn pending(&self, round_id: u32) -> Option<Vec<String>> {
        let rounds = self.lock();
        let mut pending: Vec<String> = rounds.get(&round_id)?.expected.iter().cloned().collect();
        pending.sort();
        Some(pending)
    }

    /// Forgets `round_id`. Safe to call for unknown or unfinished rounds.
    pub fn cleanup_round(&self, round_id: u32) {
        if self.lock().remove(&round_id).is_some() {
            debug!(round_id, "round cleaned up");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn completes_early_when_every_result_is_in() {
        let tracker = RoundTracker::new();
        tracker.start_round(1, ids(&["A", "B"])).unwrap();
        assert!(tracker.record_result(1, "A", "result A"));
        assert!(tracker.record_result(1, "B", "result B"));

        let start = tokio::time::Instant::now();
        let results = tracker.wait_for_round_complete(1, Duration::from_secs(60)).await;
        assert_eq!(results, ["result A", "result B"]);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_is_released_by_the_last_result() {
        let tracker = Arc::new(RoundTracker::new());
        tracker.start_round(1, ids(&["A", "B"])).unwrap();

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait_for_round_complete(1, Duration::from_secs(60)).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        tracker.record_result(1, "B", 2);
        tracker.record_result(1, "A", 1);

        let start = tokio::time::Instant::now();
        let results = waiter.await.unwrap();
        assert_eq!(results, [2, 1]);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_returns_partial_results() {
        let tracker = RoundTracker::new();
        tracker.start_round(2, ids(&["A", "B"])).unwrap();
        tracker.record_result(2, "A", 'a');

        let results = tracker.wait_for_round_complete(2, Duration::from_secs(5)).await;
        assert_eq!(results, ['a']);
        assert_eq!(tracker.pending(2), Some(ids(&["B"])));
    }

    #[test]
    fn duplicate_start_is_an_error() {
        let tracker = RoundTracker::<u8>::new();
        tracker.start_round(1, ids(&["A"])).unwrap();
        assert_eq!(
            tracker.start_round(1, ids(&["B"])),
            Err(RoundTrackerError::AlreadyStarted(1))
        );
    }

    #[test]
    fn stray_results_are_dropped() {
        let tracker = RoundTracker::new();
        assert!(!tracker.record_result(9, "A", 0));

        tracker.start_round(1, ids(&["A"])).unwrap();
        assert!(!tracker.record_result(1, "Z", 0));
        assert!(tracker.record_result(1, "A", 1));
        assert!(!tracker.record_result(1, "A", 2));

        tracker.cleanup_round(1);
        tracker.cleanup_round(1);
        assert!(!tracker.record_result(1, "A", 3));
        assert_eq!(tracker.pending(1), None);
    }

    #[tokio::test]
    async fn empty_round_is_complete_immediately() {
        let tracker = RoundTracker::<u8>::new();
        tracker.start_round(1, Vec::new()).unwrap();
        let results = tracker.wait_for_round_complete(1, Duration::from_secs(3600)).await;
        assert!(results.is_empty());
        assert!(tracker.wait_for_round_complete(7, Duration::from_secs(3600)).await.is_empty());
    }
}
