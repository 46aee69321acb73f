use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Restart policy shared by every supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Maximum number of restarts within the time window
    pub max_restarts: usize,
    /// Trailing window used to count restarts
    pub window: Duration,
}

/// Outcome of a restart policy evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    Allow,
    /// `restart_on_exit` is off for the process
    Disabled,
    /// Too many restarts inside the window
    LimitExceeded { recent: usize },
}

impl RestartDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RestartDecision::Allow)
    }
}

impl RestartPolicy {
    pub fn new(max_restarts: usize, window: Duration) -> Self {
        Self {
            max_restarts,
            window,
        }
    }

    /// Decide whether a process may be restarted right now
    pub fn evaluate(&self, restart_on_exit: bool, history: &RestartHistory) -> RestartDecision {
        self.evaluate_at(restart_on_exit, history, Instant::now())
    }

    /// Decide whether a process may be restarted at `now`.
    ///
    /// Pure over its inputs: counts history entries newer than `now - window`
    /// and denies once that count reaches `max_restarts`.
    pub fn evaluate_at(
        &self,
        restart_on_exit: bool,
        history: &RestartHistory,
        now: Instant,
    ) -> RestartDecision {
        if !restart_on_exit {
            return RestartDecision::Disabled;
        }

        let recent = history.count_within(self.window, now);
        if recent >= self.max_restarts {
            RestartDecision::LimitExceeded { recent }
        } else {
            RestartDecision::Allow
        }
    }
}

/// A single restart timestamp
#[derive(Debug, Clone, Copy)]
pub struct RestartEntry {
    pub at: Instant,
    pub wall: DateTime<Utc>,
}

/// Ordered restart history of one process
#[derive(Debug, Clone, Default)]
pub struct RestartHistory {
    entries: Vec<RestartEntry>,
}

impl RestartHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a restart at the current time
    pub fn record(&mut self) {
        self.record_at(Instant::now(), Utc::now());
    }

    /// Record a restart at the given time; out-of-order timestamps are clamped
    /// so the history stays non-decreasing
    pub fn record_at(&mut self, at: Instant, wall: DateTime<Utc>) {
        let at = match self.entries.last() {
            Some(last) if last.at > at => last.at,
            _ => at,
        };
        self.entries.push(RestartEntry { at, wall });
    }

    /// Number of restarts newer than `now - window`
    pub fn count_within(&self, window: Duration, now: Instant) -> usize {
        self.entries
            .iter()
            .filter(|entry| now.saturating_duration_since(entry.at) < window)
            .count()
    }

    /// Drop entries older than the window; they can no longer affect a decision
    pub fn prune(&mut self, window: Duration, now: Instant) {
        self.entries
            .retain(|entry| now.saturating_duration_since(entry.at) < window);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Wall-clock timestamps, oldest first
    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.entries.iter().map(|entry| entry.wall).collect()
    }

    pub fn last(&self) -> Option<&RestartEntry> {
        self.entries.last()
    }
}

impl Serialize for RestartHistory {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_seq(self.entries.iter().map(|entry| entry.wall))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history_at(offsets_secs: &[u64], now: Instant) -> RestartHistory {
        let mut history = RestartHistory::new();
        for offset in offsets_secs {
            history.record_at(now - Duration::from_secs(*offset), Utc::now());
        }
        history
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_policy_never_restarts() {
        let policy = RestartPolicy::new(5, Duration::from_secs(60));
        let history = RestartHistory::new();
        assert_eq!(policy.evaluate(false, &history), RestartDecision::Disabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_allows_under_limit() {
        let policy = RestartPolicy::new(3, Duration::from_secs(60));
        let mut history = RestartHistory::new();

        assert!(policy.evaluate(true, &history).is_allowed());
        history.record();
        assert!(policy.evaluate(true, &history).is_allowed());
        history.record();
        assert!(policy.evaluate(true, &history).is_allowed());
        history.record();

        // Limit reached: the very next restart is denied
        assert_eq!(
            policy.evaluate(true, &history),
            RestartDecision::LimitExceeded { recent: 3 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_ages_out() {
        let policy = RestartPolicy::new(1, Duration::from_secs(10));
        let mut history = RestartHistory::new();
        history.record();

        assert!(!policy.evaluate(true, &history).is_allowed());

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(!policy.evaluate(true, &history).is_allowed());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(policy.evaluate(true, &history).is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_recent_entries_count() {
        let now = Instant::now() + Duration::from_secs(3600);
        let policy = RestartPolicy::new(2, Duration::from_secs(60));
        let history = history_at(&[600, 300, 30], now);

        assert_eq!(history.count_within(Duration::from_secs(60), now), 1);
        assert!(policy.evaluate_at(true, &history, now).is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_evaluate_is_pure() {
        let now = Instant::now() + Duration::from_secs(100);
        let policy = RestartPolicy::new(1, Duration::from_secs(60));
        let history = history_at(&[10], now);

        let first = policy.evaluate_at(true, &history, now);
        let second = policy.evaluate_at(true, &history, now);
        assert_eq!(first, second);
        assert_eq!(history.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_is_monotonic() {
        let now = Instant::now() + Duration::from_secs(100);
        let mut history = RestartHistory::new();
        history.record_at(now, Utc::now());
        history.record_at(now - Duration::from_secs(50), Utc::now());

        assert_eq!(history.len(), 2);
        assert_eq!(history.last().unwrap().at, now);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune() {
        let now = Instant::now() + Duration::from_secs(1000);
        let mut history = history_at(&[500, 100, 5], now);

        history.prune(Duration::from_secs(60), now);
        assert_eq!(history.len(), 1);

        history.prune(Duration::ZERO, now);
        assert!(history.is_empty());
    }
}
