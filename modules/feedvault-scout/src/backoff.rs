// Retry and backoff ladders for the collect loop.
//
// Two ladders share one policy:
// - idle/refresh: consecutive empty batches first wait, then refresh the
//   page, then give up as exhausted
// - blocked UI: while the feed shows a retry prompt, wait a long time and
//   press it, up to a fixed number of attempts
//
// Transient driver errors get a third, short counter. Everything here is
// pure bookkeeping; the collector performs the actual waits.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Empty batches tolerated before refreshing.
    pub max_idle: u32,
    /// Refreshes without new records before giving up.
    pub max_refresh: u32,
    /// Retry-prompt presses before falling through to the idle ladder.
    pub max_blocked_retries: u32,
    /// Consecutive transient list errors before counting as an empty batch.
    pub max_transient_retries: u32,
    pub idle_wait: Duration,
    pub blocked_wait: Duration,
    pub after_retry_wait: Duration,
    pub transient_wait: Duration,
    /// Delay after navigation or refresh before the first scan.
    pub settle_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_idle: 5,
            max_refresh: 3,
            max_blocked_retries: 15,
            max_transient_retries: 5,
            idle_wait: Duration::from_secs(1),
            blocked_wait: Duration::from_secs(600),
            after_retry_wait: Duration::from_secs(2),
            transient_wait: Duration::from_secs(2),
            settle_delay: Duration::from_secs(3),
        }
    }
}

impl BackoffPolicy {
    /// Same thresholds, no waiting. For tests.
    pub fn immediate() -> Self {
        Self {
            idle_wait: Duration::ZERO,
            blocked_wait: Duration::ZERO,
            after_retry_wait: Duration::ZERO,
            transient_wait: Duration::ZERO,
            settle_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleAction {
    /// Wait, then scan again.
    Wait(Duration),
    /// Reload the feed, then scan again.
    Refresh,
    /// Stop: the feed has nothing more to give.
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockedAction {
    /// Wait this long, then press the retry prompt.
    WaitThenRetry(Duration),
    /// Retry budget spent; continue with the idle ladder.
    FallThrough,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientAction {
    Retry(Duration),
    /// Budget spent; treat the scan as empty.
    TreatAsEmpty,
}

/// Counter state for one session, driven by a [`BackoffPolicy`].
#[derive(Debug, Clone)]
pub struct Ladder {
    policy: BackoffPolicy,
    empty_batches: u32,
    refreshes: u32,
    blocked_retries: u32,
    transient_retries: u32,
}

impl Ladder {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            empty_batches: 0,
            refreshes: 0,
            blocked_retries: 0,
            transient_retries: 0,
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// A scan added nothing. Refreshes start once `max_idle` empty batches
    /// have been seen; the empty counter keeps climbing across refreshes.
    pub fn on_empty_batch(&mut self) -> IdleAction {
        self.transient_retries = 0;
        if self.empty_batches >= self.policy.max_idle {
            if self.refreshes >= self.policy.max_refresh {
                return IdleAction::GiveUp;
            }
            self.refreshes += 1;
            self.empty_batches += 1;
            return IdleAction::Refresh;
        }
        self.empty_batches += 1;
        IdleAction::Wait(self.policy.idle_wait)
    }

    /// A scan added at least one record.
    pub fn on_new_records(&mut self) {
        self.empty_batches = 0;
        self.refreshes = 0;
        self.transient_retries = 0;
    }

    /// The retry prompt is visible.
    pub fn on_blocked(&mut self) -> BlockedAction {
        if self.blocked_retries >= self.policy.max_blocked_retries {
            return BlockedAction::FallThrough;
        }
        self.blocked_retries += 1;
        BlockedAction::WaitThenRetry(self.policy.blocked_wait)
    }

    /// The retry prompt is gone.
    pub fn on_unblocked(&mut self) {
        self.blocked_retries = 0;
    }

    /// Listing the feed failed with a transient error.
    pub fn on_transient(&mut self) -> TransientAction {
        if self.transient_retries >= self.policy.max_transient_retries {
            self.transient_retries = 0;
            return TransientAction::TreatAsEmpty;
        }
        self.transient_retries += 1;
        TransientAction::Retry(self.policy.transient_wait)
    }

    pub fn empty_batches(&self) -> u32 {
        self.empty_batches
    }

    pub fn refreshes(&self) -> u32 {
        self.refreshes
    }

    pub fn blocked_retries(&self) -> u32 {
        self.blocked_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_ladder_waits_then_refreshes_then_gives_up() {
        let mut ladder = Ladder::new(BackoffPolicy::immediate());
        let actions: Vec<_> = (0..9).map(|_| ladder.on_empty_batch()).collect();

        assert_eq!(&actions[..5], &[IdleAction::Wait(Duration::ZERO); 5]);
        assert_eq!(&actions[5..8], &[IdleAction::Refresh; 3]);
        assert_eq!(actions[8], IdleAction::GiveUp);
        assert_eq!(ladder.refreshes(), 3);
    }

    #[test]
    fn new_records_reset_idle_ladder() {
        let mut ladder = Ladder::new(BackoffPolicy::immediate());
        for _ in 0..7 {
            ladder.on_empty_batch();
        }
        assert_eq!(ladder.refreshes(), 2);

        ladder.on_new_records();
        assert_eq!(ladder.empty_batches(), 0);
        assert_eq!(ladder.refreshes(), 0);
        assert_eq!(ladder.on_empty_batch(), IdleAction::Wait(Duration::ZERO));
    }

    #[test]
    fn blocked_ladder_caps_retries() {
        let policy = BackoffPolicy {
            max_blocked_retries: 2,
            ..BackoffPolicy::default()
        };
        let mut ladder = Ladder::new(policy);
        let wait = Duration::from_secs(600);

        assert_eq!(ladder.on_blocked(), BlockedAction::WaitThenRetry(wait));
        assert_eq!(ladder.on_blocked(), BlockedAction::WaitThenRetry(wait));
        assert_eq!(ladder.on_blocked(), BlockedAction::FallThrough);

        ladder.on_unblocked();
        assert_eq!(ladder.blocked_retries(), 0);
        assert_eq!(ladder.on_blocked(), BlockedAction::WaitThenRetry(wait));
    }

    #[test]
    fn transient_errors_become_empty_batch_after_budget() {
        let policy = BackoffPolicy {
            max_transient_retries: 2,
            ..BackoffPolicy::immediate()
        };
        let mut ladder = Ladder::new(policy);
        assert_eq!(ladder.on_transient(), TransientAction::Retry(Duration::ZERO));
        assert_eq!(ladder.on_transient(), TransientAction::Retry(Duration::ZERO));
        assert_eq!(ladder.on_transient(), TransientAction::TreatAsEmpty);
        // budget starts over
        assert_eq!(ladder.on_transient(), TransientAction::Retry(Duration::ZERO));
    }

    #[test]
    fn default_policy_matches_feed_behaviour() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.max_idle, 5);
        assert_eq!(policy.max_refresh, 3);
        assert_eq!(policy.max_blocked_retries, 15);
        assert_eq!(policy.blocked_wait, Duration::from_secs(600));
    }
}
