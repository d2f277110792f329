//! Retry lockout policy for PIN attempts
//!
//! The first few wrong PINs are free. Every failure past that locks further
//! attempts for a window that never shrinks as failures accumulate, and a
//! hard limit locks the wallet until it is reset externally.

use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Longest accepted lockout window (ten years)
pub const MAX_LOCKOUT_MINUTES: u64 = 10 * 365 * 24 * 60;

/// Escalation schedule
///
/// Schedules that fail [`LockoutSchedule::validate`] still never unlock
/// early: any window that cannot be represented locks permanently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockoutSchedule {
    /// Failures tolerated before the first lockout window
    pub free_attempts: u32,
    /// Window lengths in minutes for failures `free_attempts..`; the last
    /// entry repeats until `permanent_after`
    pub lockout_minutes: Vec<u64>,
    /// Failure count at which the lockout becomes permanent
    pub permanent_after: u32,
}

impl Default for LockoutSchedule {
    fn default() -> Self {
        Self {
            free_attempts: 3,
            lockout_minutes: vec![1, 5, 15, 60, 240],
            permanent_after: 8,
        }
    }
}

/// Lockout a failure count maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Window {
    Open,
    Timed(Duration),
    Permanent,
}

impl LockoutSchedule {
    /// Check schedule consistency
    pub fn validate(&self) -> Result<()> {
        if self.free_attempts == 0 {
            return Err(Error::Config(
                "Lockout schedule needs at least one free attempt".to_string(),
            ));
        }
        if self.permanent_after <= self.free_attempts {
            return Err(Error::Config(format!(
                "Permanent lockout ({}) must come after the free attempts ({})",
                self.permanent_after, self.free_attempts
            )));
        }
        if self.lockout_minutes.is_empty() {
            return Err(Error::Config("Lockout windows are empty".to_string()));
        }
        if self.lockout_minutes.contains(&0) {
            return Err(Error::Config("Lockout windows must be positive".to_string()));
        }
        if let Some(too_long) = self
            .lockout_minutes
            .iter()
            .find(|minutes| **minutes > MAX_LOCKOUT_MINUTES)
        {
            return Err(Error::Config(format!(
                "Lockout window of {} minutes exceeds the maximum of {}",
                too_long, MAX_LOCKOUT_MINUTES
            )));
        }
        if self.lockout_minutes.windows(2).any(|pair| pair[1] < pair[0]) {
            return Err(Error::Config(
                "Lockout windows must be non-decreasing".to_string(),
            ));
        }
        Ok(())
    }

    fn window(&self, failures: u32) -> Window {
        if failures >= self.permanent_after {
            return Window::Permanent;
        }
        if failures < self.free_attempts {
            return Window::Open;
        }
        let index = (failures - self.free_attempts) as usize;
        let minutes = self
            .lockout_minutes
            .get(index)
            .or_else(|| self.lockout_minutes.last());
        match minutes
            .and_then(|minutes| i64::try_from(*minutes).ok())
            .and_then(Duration::try_minutes)
        {
            Some(length) if length > Duration::zero() => Window::Timed(length),
            _ => Window::Permanent,
        }
    }
}

/// End of an active lockout
///
/// Ordered so that `Permanently` is later than any deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockedUntil {
    /// Locked before this instant
    Until(DateTime<Utc>),
    /// Locked until the wallet is reset
    Permanently,
}

impl LockedUntil {
    /// Whether the lockout still applies at `now`
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self {
            LockedUntil::Until(deadline) => now < *deadline,
            LockedUntil::Permanently => true,
        }
    }
}

/// Persisted retry state of one wallet
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutState {
    /// Wrong PINs since the last success
    pub consecutive_failures: u32,
    /// Latest lockout deadline, if any was ever set since the last success
    pub locked_until: Option<LockedUntil>,
}

/// Lockout policy over a [`LockoutState`]
#[derive(Debug, Clone)]
pub struct RetryLockoutPolicy {
    schedule: LockoutSchedule,
    state: LockoutState,
}

impl RetryLockoutPolicy {
    /// Create with a clean state
    pub fn new(schedule: LockoutSchedule) -> Self {
        Self::with_state(schedule, LockoutState::default())
    }

    /// Resume from a persisted state
    pub fn with_state(schedule: LockoutSchedule, state: LockoutState) -> Self {
        Self { schedule, state }
    }

    /// Current state
    pub fn state(&self) -> &LockoutState {
        &self.state
    }

    /// Schedule in use
    pub fn schedule(&self) -> &LockoutSchedule {
        &self.schedule
    }

    /// Whether attempts are refused at `now`
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.state
            .locked_until
            .map_or(false, |until| until.is_active(now))
    }

    /// Whether the wallet needs an external reset
    pub fn is_permanently_locked(&self) -> bool {
        self.state.locked_until == Some(LockedUntil::Permanently)
    }

    /// Record a wrong PIN at `now`
    pub fn record_failure(&mut self, now: DateTime<Utc>) -> &LockoutState {
        self.state.consecutive_failures = self.state.consecutive_failures.saturating_add(1);

        let next = match self.schedule.window(self.state.consecutive_failures) {
            Window::Open => None,
            Window::Timed(length) => Some(
                now.checked_add_signed(length)
                    .map_or(LockedUntil::Permanently, LockedUntil::Until),
            ),
            Window::Permanent => Some(LockedUntil::Permanently),
        };
        // Only ever tighten.
        self.state.locked_until = self.state.locked_until.max(next);

        &self.state
    }

    /// Record a correct PIN
    pub fn record_success(&mut self) {
        self.state = LockoutState::default();
    }

    /// Time left in a timed lockout
    pub fn remaining_lock_time(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self.state.locked_until {
            Some(LockedUntil::Until(deadline)) if now < deadline => Some(deadline - now),
            _ => None,
        }
    }

    /// Attempts allowed before the next lockout
    pub fn attempts_remaining(&self, now: DateTime<Utc>) -> u32 {
        if self.is_locked(now) {
            0
        } else if self.state.consecutive_failures < self.schedule.free_attempts {
            self.schedule.free_attempts - self.state.consecutive_failures
        } else {
            1
        }
    }

    /// Human-readable hint, e.g. "0 attempts remaining, locked for 5 minutes"
    pub fn remaining_attempts_message(&self, now: DateTime<Utc>) -> String {
        let attempts = plural(self.attempts_remaining(now) as u64, "attempt");
        if self.is_permanently_locked() {
            return format!("{} remaining, wallet permanently locked", attempts);
        }
        match self.remaining_lock_time(now) {
            Some(left) => {
                let minutes = (left.num_seconds().saturating_add(59) / 60).max(1) as u64;
                format!("{} remaining, locked for {}", attempts, plural(minutes, "minute"))
            }
            None => format!("{} remaining", attempts),
        }
    }
}

fn plural(count: u64, noun: &str) -> String {
    if count == 1 {
        format!("{} {}", count, noun)
    } else {
        format!("{} {}s", count, noun)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_free_attempts_do_not_lock() {
        let mut policy = RetryLockoutPolicy::new(LockoutSchedule::default());
        assert_eq!(policy.remaining_attempts_message(t0()), "3 attempts remaining");

        policy.record_failure(t0());
        policy.record_failure(t0());
        assert!(!policy.is_locked(t0()));
        assert_eq!(policy.attempts_remaining(t0()), 1);
        assert_eq!(policy.remaining_attempts_message(t0()), "1 attempt remaining");
    }

    #[test]
    fn test_threshold_failure_locks_for_first_window() {
        let mut policy = RetryLockoutPolicy::new(LockoutSchedule::default());
        for _ in 0..3 {
            policy.record_failure(t0());
        }

        assert_eq!(policy.state().consecutive_failures, 3);
        assert!(policy.is_locked(t0()));
        assert!(policy.is_locked(t0() + Duration::seconds(59)));
        assert!(!policy.is_locked(t0() + Duration::seconds(60)));
        assert_eq!(
            policy.remaining_attempts_message(t0()),
            "0 attempts remaining, locked for 1 minute"
        );
    }

    #[test]
    fn test_windows_escalate_then_go_permanent() {
        let mut policy = RetryLockoutPolicy::new(LockoutSchedule::default());
        let mut now = t0();
        let mut expected = [1i64, 5, 15, 60, 240].into_iter();

        for failure in 1..=8u32 {
            policy.record_failure(now);
            if failure < 3 {
                assert!(!policy.is_locked(now));
                continue;
            }
            if failure == 8 {
                assert!(policy.is_permanently_locked());
                assert!(policy.is_locked(now + Duration::days(3650)));
                break;
            }
            let minutes = expected.next().unwrap();
            assert_eq!(
                policy.remaining_lock_time(now),
                Some(Duration::minutes(minutes))
            );
            now += Duration::minutes(minutes);
            assert!(!policy.is_locked(now));
        }

        assert_eq!(
            policy.remaining_attempts_message(now),
            "0 attempts remaining, wallet permanently locked"
        );
    }

    #[test]
    fn test_success_clears_everything() {
        let mut policy = RetryLockoutPolicy::new(LockoutSchedule::default());
        for _ in 0..4 {
            policy.record_failure(t0());
        }
        assert!(policy.is_locked(t0()));

        policy.record_success();
        assert_eq!(policy.state(), &LockoutState::default());
        assert!(!policy.is_locked(t0()));
    }

    #[test]
    fn test_deadline_never_moves_earlier() {
        let schedule = LockoutSchedule {
            free_attempts: 1,
            lockout_minutes: vec![30],
            permanent_after: 10,
        };
        let mut policy = RetryLockoutPolicy::new(schedule);
        policy.record_failure(t0() + Duration::minutes(10));
        let first = policy.state().locked_until;

        // A failure reported with an earlier timestamp must not pull the deadline in.
        policy.record_failure(t0());
        assert_eq!(policy.state().locked_until, first);
    }

    #[test]
    fn test_schedule_validation() {
        assert!(LockoutSchedule::default().validate().is_ok());

        let decreasing = LockoutSchedule {
            lockout_minutes: vec![5, 1],
            ..Default::default()
        };
        assert!(decreasing.validate().is_err());

        let no_free = LockoutSchedule {
            free_attempts: 0,
            ..Default::default()
        };
        assert!(no_free.validate().is_err());

        let permanent_too_early = LockoutSchedule {
            permanent_after: 3,
            ..Default::default()
        };
        assert!(permanent_too_early.validate().is_err());
    }

    #[test]
    fn test_oversized_windows_rejected() {
        let huge = LockoutSchedule {
            free_attempts: 1,
            lockout_minutes: vec![u64::MAX],
            permanent_after: 5,
        };
        assert!(matches!(huge.validate(), Err(Error::Config(_))));

        let beyond_chrono = LockoutSchedule {
            lockout_minutes: vec![1_000_000_000_000_000],
            ..huge.clone()
        };
        assert!(matches!(beyond_chrono.validate(), Err(Error::Config(_))));

        let at_cap = LockoutSchedule {
            lockout_minutes: vec![MAX_LOCKOUT_MINUTES],
            ..huge
        };
        assert!(at_cap.validate().is_ok());
    }

    #[test]
    fn test_unvalidated_schedules_fail_closed() {
        // Unrepresentable windows lock permanently instead of wrapping or panicking.
        for minutes in [u64::MAX, 1_000_000_000_000_000, (i64::MAX as u64) / 60] {
            let mut policy = RetryLockoutPolicy::new(LockoutSchedule {
                free_attempts: 1,
                lockout_minutes: vec![minutes],
                permanent_after: 5,
            });
            policy.record_failure(t0());
            assert!(policy.is_locked(t0()), "window {} did not lock", minutes);
            assert!(policy.is_locked(t0() + Duration::days(3650)));
        }

        let mut empty = RetryLockoutPolicy::new(LockoutSchedule {
            free_attempts: 1,
            lockout_minutes: Vec::new(),
            permanent_after: 5,
        });
        empty.record_failure(t0());
        assert!(empty.is_permanently_locked());
    }

    #[test]
    fn test_deadline_overflow_locks_permanently() {
        let mut policy = RetryLockoutPolicy::new(LockoutSchedule {
            free_attempts: 1,
            lockout_minutes: vec![MAX_LOCKOUT_MINUTES],
            permanent_after: 5,
        });
        policy.record_failure(DateTime::<Utc>::MAX_UTC - Duration::minutes(1));
        assert!(policy.is_permanently_locked());
    }

    #[test]
    fn test_state_serialization() {
        let state = LockoutState {
            consecutive_failures: 8,
            locked_until: Some(LockedUntil::Permanently),
        };
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("permanently"));
        let back: LockoutState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
