//! Retry scheduling: the backoff ladder and the timer wakeup queue.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

use crate::domain::RequestId;

/// Delay before the housekeeping recheck that follows any run which
/// dispatched at least one request.
pub const HOUSEKEEPING_DELAY: Duration = Duration::from_millis(2000);

/// Escalating delay ladder for failed requests.
///
/// Fast retries absorb transient blips; the one-minute and five-minute rungs
/// bound resource usage under a sustained outage while keeping eventual
/// delivery alive.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub first: Duration,
    /// Failures 2 and 3.
    pub early: Duration,
    /// Failures 4 through 9.
    pub sustained: Duration,
    /// Failure 10 and beyond.
    pub outage: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            first: Duration::from_millis(1000),
            early: Duration::from_millis(4000),
            sustained: Duration::from_millis(60_000),
            outage: Duration::from_millis(300_000),
        }
    }
}

impl BackoffPolicy {
    /// Delay before a request with `attempts` recorded failures becomes
    /// eligible for dispatch again.
    pub fn delay(&self, attempts: u32) -> Duration {
        match attempts {
            0 | 1 => self.first,
            2..=3 => self.early,
            4..=9 => self.sustained,
            _ => self.outage,
        }
    }
}

/// Why a wakeup was scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeReason {
    /// A failed request's backoff window elapses at this time.
    RetryDue(RequestId),
    /// The deduplicated housekeeping recheck.
    Recheck,
}

/// One (fire-time, reason) entry in the wakeup queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wakeup {
    pub fire_at_ms: i64,
    pub reason: WakeReason,
}

impl PartialOrd for Wakeup {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Wakeup {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the BinaryHeap pops the earliest fire time first.
        other.fire_at_ms.cmp(&self.fire_at_ms)
    }
}

#[derive(Default)]
struct SchedulerState {
    wakeups: BinaryHeap<Wakeup>,
    recheck_pending: bool,
}

/// Owns the ordered wakeup list and the dedup flag for the housekeeping
/// recheck. A single timer loop drains it (see `queue`); the `Notify` wakes
/// that loop whenever an earlier entry appears.
#[derive(Default)]
pub struct Scheduler {
    state: Mutex<SchedulerState>,
    notify: Notify,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resume processing exactly when a failed request's backoff elapses.
    /// Retry wakeups are independent of the recheck cadence: a five-minute
    /// backoff must not be throttled to (or hidden behind) the 2s recheck.
    pub fn schedule_retry(&self, fire_at_ms: i64, id: RequestId) {
        self.state().wakeups.push(Wakeup {
            fire_at_ms,
            reason: WakeReason::RetryDue(id),
        });
        self.notify.notify_one();
    }

    /// Arm the housekeeping recheck, unless one is already pending. Returns
    /// whether a new recheck was scheduled.
    pub fn schedule_recheck(&self, fire_at_ms: i64) -> bool {
        {
            let mut state = self.state();
            if state.recheck_pending {
                return false;
            }
            state.recheck_pending = true;
            state.wakeups.push(Wakeup {
                fire_at_ms,
                reason: WakeReason::Recheck,
            });
        }
        self.notify.notify_one();
        true
    }

    /// Pop every wakeup due at `now_ms`, earliest first. Popping the recheck
    /// clears the pending flag, so the next productive run can arm a fresh
    /// one.
    pub fn pop_due(&self, now_ms: i64) -> Vec<Wakeup> {
        let mut state = self.state();
        let mut due = Vec::new();
        while let Some(next) = state.wakeups.peek() {
            if next.fire_at_ms > now_ms {
                break;
            }
            let Some(wakeup) = state.wakeups.pop() else {
                break;
            };
            if wakeup.reason == WakeReason::Recheck {
                state.recheck_pending = false;
            }
            due.push(wakeup);
        }
        due
    }

    /// Fire time of the earliest pending wakeup, if any.
    pub fn next_fire_at(&self) -> Option<i64> {
        self.state().wakeups.peek().map(|w| w.fire_at_ms)
    }

    /// Wait until a new wakeup is scheduled.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn id(tail: u8) -> RequestId {
        RequestId::parse(&format!("00112233-4455-6677-8899-aabbccddee{tail:02x}")).unwrap()
    }

    #[rstest]
    #[case(1, 1000)]
    #[case(2, 4000)]
    #[case(3, 4000)]
    #[case(4, 60_000)]
    #[case(9, 60_000)]
    #[case(10, 300_000)]
    #[case(15, 300_000)]
    fn backoff_ladder(#[case] attempts: u32, #[case] expect_ms: u64) {
        assert_eq!(
            BackoffPolicy::default().delay(attempts),
            Duration::from_millis(expect_ms)
        );
    }

    #[test]
    fn backoff_is_monotonic() {
        let policy = BackoffPolicy::default();
        assert!(policy.delay(1) < policy.delay(3));
        assert!(policy.delay(3) < policy.delay(5));
        assert!(policy.delay(5) < policy.delay(15));
    }

    #[test]
    fn wakeups_pop_in_fire_order() {
        let scheduler = Scheduler::new();
        scheduler.schedule_retry(300, id(1));
        scheduler.schedule_retry(100, id(2));
        scheduler.schedule_recheck(200);

        assert!(scheduler.pop_due(50).is_empty());
        assert_eq!(scheduler.next_fire_at(), Some(100));

        let due = scheduler.pop_due(300);
        let times: Vec<i64> = due.iter().map(|w| w.fire_at_ms).collect();
        assert_eq!(times, vec![100, 200, 300]);
        assert_eq!(scheduler.next_fire_at(), None);
    }

    #[test]
    fn only_due_wakeups_pop() {
        let scheduler = Scheduler::new();
        scheduler.schedule_retry(100, id(1));
        scheduler.schedule_retry(5000, id(2));

        assert_eq!(scheduler.pop_due(100).len(), 1);
        assert_eq!(scheduler.next_fire_at(), Some(5000));
    }

    #[test]
    fn recheck_is_deduplicated_until_it_fires() {
        let scheduler = Scheduler::new();
        assert!(scheduler.schedule_recheck(100));
        assert!(!scheduler.schedule_recheck(150));

        let due = scheduler.pop_due(200);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].reason, WakeReason::Recheck);

        // Flag cleared by the pop; a new recheck can be armed.
        assert!(scheduler.schedule_recheck(300));
    }

    #[test]
    fn retries_are_not_merged_with_the_recheck() {
        let scheduler = Scheduler::new();
        scheduler.schedule_recheck(2000);
        scheduler.schedule_retry(300_000, id(1));

        // The distant retry entry survives the recheck firing.
        assert_eq!(scheduler.pop_due(2000).len(), 1);
        assert_eq!(scheduler.next_fire_at(), Some(300_000));
    }
}
