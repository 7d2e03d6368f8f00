//! Consecutive-failure lockout.
//!
//! The policy is a pure value; stores call [`LockoutPolicy::apply_failure`] and
//! [`register_success`] inside their per-row critical section so
//! two concurrent failures cannot lose an increment.
//!
//! A failure while a lock is live bumps the counter but keeps `locked_until`.
//! Repeated attempts therefore cannot push the unlock time out indefinitely.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::User;
use crate::session::saturating_add;

pub const DEFAULT_MAX_FAILED_ATTEMPTS: u32 = 5;
pub const DEFAULT_LOCKOUT_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutPolicy {
    pub max_failed_attempts: u32,
    pub lockout_duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failed_attempts: DEFAULT_MAX_FAILED_ATTEMPTS,
            lockout_duration: Duration::minutes(DEFAULT_LOCKOUT_MINUTES),
        }
    }
}

/// What a single failed attempt did to the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Counter bumped; account still usable.
    Counted { attempts: u32 },
    /// This attempt crossed the threshold and started a lock.
    LockedNow { attempts: u32, until: DateTime<Utc> },
    /// The account was already locked; the lock was left unchanged.
    AlreadyLocked { attempts: u32, until: DateTime<Utc> },
}

pub fn is_locked(user: &User, now: DateTime<Utc>) -> bool {
    matches!(user.locked_until, Some(until) if until > now)
}

impl LockoutPolicy {
    pub fn new(max_failed_attempts: u32, lockout_duration: Duration) -> Self {
        Self {
            max_failed_attempts,
            lockout_duration,
        }
    }

    /// Record one failed attempt on `user` at `now`.
    pub fn apply_failure(&self, user: &mut User, now: DateTime<Utc>) -> FailureOutcome {
        let attempts = user.failed_login_attempts.saturating_add(1);
        user.failed_login_attempts = attempts;
        user.updated_at = now;

        if let Some(until) = user.locked_until.filter(|until| *until > now) {
            return FailureOutcome::AlreadyLocked { attempts, until };
        }

        if attempts >= self.max_failed_attempts {
            let until = saturating_add(now, self.lockout_duration);
            user.locked_until = Some(until);
            FailureOutcome::LockedNow { attempts, until }
        } else {
            FailureOutcome::Counted { attempts }
        }
    }
}

/// What a verified password did to the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessOutcome {
    /// Counter and lock cleared, `last_login` stamped.
    Cleared,
    /// A lock went live after the caller's read; nothing was changed.
    Locked { until: DateTime<Utc> },
}

/// Successful password check.
///
/// Re-checks the lock on the row being written, so a lock set between the
/// caller's read and this write is honoured. Otherwise the counter and lock
/// are cleared, including a lock that has already expired.
pub fn register_success(user: &mut User, now: DateTime<Utc>) -> SuccessOutcome {
    if let Some(until) = user.locked_until.filter(|until| *until > now) {
        return SuccessOutcome::Locked { until };
    }
    user.failed_login_attempts = 0;
    user.locked_until = None;
    user.last_login = Some(now);
    user.updated_at = now;
    SuccessOutcome::Cleared
}

/// Administrative unlock.
pub fn clear_lockout(user: &mut User, now: DateTime<Utc>) {
    user.failed_login_attempts = 0;
    user.locked_until = None;
    user.updated_at = now;
}
