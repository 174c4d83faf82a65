//! Brute-force protection.
//!
//! Failures are tracked per hashed key inside a sliding window. Reaching the
//! threshold locks the key for a fixed duration; a success clears everything.
//!
//! Backends:
//! - [`FileBruteForceGuard`]: one JSON record per key guarded by `flock`.
//! - [`RedisBruteForceGuard`]: sorted set of failure timestamps plus a TTL lock key.

mod file;
mod redis;

pub use self::file::FileBruteForceGuard;
pub use self::redis::RedisBruteForceGuard;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{error, warn};

use super::{error::AuthenticationError, utils::sha256_hex};

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("guard storage I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("guard record encoding failure: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("guard redis failure: {0}")]
    Redis(#[from] ::redis::RedisError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThrottlePolicy {
    pub max_attempts: u32,
    pub window: Duration,
    pub lockout: Duration,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::from_secs(15 * 60),
            lockout: Duration::from_secs(15 * 60),
        }
    }
}

impl ThrottlePolicy {
    fn window_secs(&self) -> i64 {
        i64::try_from(self.window.as_secs()).unwrap_or(i64::MAX)
    }

    fn lockout_secs(&self) -> i64 {
        i64::try_from(self.lockout.as_secs()).unwrap_or(i64::MAX)
    }
}

/// Wall clock in unix seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| {
                i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX)
            })
    }
}

/// Settable clock for tests and replay.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    #[must_use]
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let secs = i64::try_from(by.as_secs()).unwrap_or(i64::MAX);
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> i64 {
        (**self).now()
    }
}

/// Storage key for an identifier, optionally scoped to a caller address.
/// Only the hash is ever persisted.
#[must_use]
pub fn guard_key(identifier: &str, addr: Option<&str>) -> String {
    match addr {
        Some(addr) => sha256_hex(&format!("{identifier}:{addr}")),
        None => sha256_hex(identifier),
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    #[serde(default)]
    pub failures: Vec<i64>,
    #[serde(default)]
    pub locked_until: Option<i64>,
}

impl FailureRecord {
    fn prune(&mut self, now: i64, policy: &ThrottlePolicy) {
        let window = policy.window_secs();
        self.failures.retain(|at| now.saturating_sub(*at) < window);
    }

    pub fn register_failure(&mut self, now: i64, policy: &ThrottlePolicy) {
        self.failures.push(now);
        self.prune(now, policy);
        let count = u32::try_from(self.failures.len()).unwrap_or(u32::MAX);
        if count >= policy.max_attempts {
            self.locked_until = Some(now.saturating_add(policy.lockout_secs()));
        }
    }

    #[must_use]
    pub fn failure_count(&self, now: i64, policy: &ThrottlePolicy) -> u32 {
        let window = policy.window_secs();
        let count = self
            .failures
            .iter()
            .filter(|at| now.saturating_sub(**at) < window)
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn is_locked(&self, now: i64) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }

    #[must_use]
    pub fn remaining_lockout(&self, now: i64) -> u64 {
        self.locked_until
            .map_or(0, |until| u64::try_from(until.saturating_sub(now)).unwrap_or(0))
    }

    /// Drop an expired lock. Returns `true` if the record changed.
    pub fn clear_expired_lock(&mut self, now: i64) -> bool {
        if self.locked_until.is_some_and(|until| until <= now) {
            self.locked_until = None;
            return true;
        }
        false
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty() && self.locked_until.is_none()
    }
}

pub trait BruteForceGuard: Send + Sync {
    /// # Errors
    /// Returns an error if the backend cannot be updated.
    fn record_failure(&self, identifier: &str, addr: Option<&str>) -> Result<(), GuardError>;

    /// # Errors
    /// Returns an error if the backend cannot be updated.
    fn record_success(&self, identifier: &str, addr: Option<&str>) -> Result<(), GuardError>;

    /// # Errors
    /// Returns an error if the backend cannot be read.
    fn is_locked(&self, identifier: &str, addr: Option<&str>) -> Result<bool, GuardError>;

    /// # Errors
    /// Returns an error if the backend cannot be read.
    fn failure_count(&self, identifier: &str, addr: Option<&str>) -> Result<u32, GuardError>;

    /// Seconds until the lock expires, `0` when not locked.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be read.
    fn remaining_lockout_time(&self, identifier: &str, addr: Option<&str>)
        -> Result<u64, GuardError>;

    /// # Errors
    /// Returns an error if the backend cannot be updated.
    fn reset(&self, identifier: &str, addr: Option<&str>) -> Result<(), GuardError>;
}

/// Guard that never locks anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopBruteForceGuard;

impl BruteForceGuard for NoopBruteForceGuard {
    fn record_failure(&self, _identifier: &str, _addr: Option<&str>) -> Result<(), GuardError> {
        Ok(())
    }

    fn record_success(&self, _identifier: &str, _addr: Option<&str>) -> Result<(), GuardError> {
        Ok(())
    }

    fn is_locked(&self, _identifier: &str, _addr: Option<&str>) -> Result<bool, GuardError> {
        Ok(false)
    }

    fn failure_count(&self, _identifier: &str, _addr: Option<&str>) -> Result<u32, GuardError> {
        Ok(0)
    }

    fn remaining_lockout_time(
        &self,
        _identifier: &str,
        _addr: Option<&str>,
    ) -> Result<u64, GuardError> {
        Ok(0)
    }

    fn reset(&self, _identifier: &str, _addr: Option<&str>) -> Result<(), GuardError> {
        Ok(())
    }
}

/// Refuse the attempt when the key is locked or the guard is unreachable.
pub(crate) fn ensure_not_locked(
    guard: &dyn BruteForceGuard,
    identifier: &str,
    addr: Option<&str>,
) -> Result<(), AuthenticationError> {
    let locked = guard.is_locked(identifier, addr).map_err(|err| {
        error!("Brute-force guard unavailable: {err}");
        AuthenticationError::ServiceUnavailable
    })?;
    if !locked {
        return Ok(());
    }
    let remaining_seconds = guard
        .remaining_lockout_time(identifier, addr)
        .map_err(|err| {
            error!("Brute-force guard unavailable: {err}");
            AuthenticationError::ServiceUnavailable
        })?;
    warn!(
        guard_key = %guard_key(identifier, addr),
        remaining_seconds, "Attempt refused while locked"
    );
    Err(AuthenticationError::LockedOut { remaining_seconds })
}

/// Count a failed attempt. Backend errors fail closed.
pub(crate) fn register_failure(
    guard: &dyn BruteForceGuard,
    identifier: &str,
    addr: Option<&str>,
) -> Result<(), AuthenticationError> {
    guard.record_failure(identifier, addr).map_err(|err| {
        error!("Failed to record authentication failure: {err}");
        AuthenticationError::ServiceUnavailable
    })
}

/// Clear failures after a successful attempt. Backend errors fail closed.
pub(crate) fn register_success(
    guard: &dyn BruteForceGuard,
    identifier: &str,
    addr: Option<&str>,
) -> Result<(), AuthenticationError> {
    guard.record_success(identifier, addr).map_err(|err| {
        error!("Failed to clear authentication failures: {err}");
        AuthenticationError::ServiceUnavailable
    })
}
