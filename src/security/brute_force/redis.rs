use ::redis::{Client, Commands, Connection, RedisError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::{guard_key, BruteForceGuard, Clock, GuardError, SystemClock, ThrottlePolicy};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_NAMESPACE: &str = "gatehouse:bf";

/// Redis backed guard.
///
/// Failures live in a sorted set scored by unix time so window trimming and
/// counting are range operations; the lock is a separate key whose TTL is the
/// lockout duration, so it expires on its own.
pub struct RedisBruteForceGuard {
    client: Client,
    connection: Mutex<Option<Connection>>,
    namespace: String,
    policy: ThrottlePolicy,
    clock: Arc<dyn Clock>,
}

impl RedisBruteForceGuard {
    /// # Errors
    /// Returns an error if the URL is not a valid redis connection string.
    pub fn new(url: &str, policy: ThrottlePolicy) -> Result<Self, GuardError> {
        Ok(Self {
            client: Client::open(url)?,
            connection: Mutex::new(None),
            namespace: DEFAULT_NAMESPACE.to_string(),
            policy,
            clock: Arc::new(SystemClock),
        })
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn failures_key(&self, key: &str) -> String {
        format!("{}:failures:{key}", self.namespace)
    }

    fn lock_key(&self, key: &str) -> String {
        format!("{}:lock:{key}", self.namespace)
    }

    fn window_secs(&self) -> i64 {
        self.policy.window_secs()
    }

    /// Run `op` on the shared connection, reconnecting when the last one broke.
    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, RedisError>,
    ) -> Result<T, GuardError> {
        let mut slot = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut connection = match slot.take() {
            Some(connection) => connection,
            None => self.client.get_connection_with_timeout(CONNECT_TIMEOUT)?,
        };
        match op(&mut connection) {
            Ok(value) => {
                *slot = Some(connection);
                Ok(value)
            }
            Err(err) => {
                if !(err.is_io_error() || err.is_connection_dropped() || err.is_timeout()) {
                    *slot = Some(connection);
                }
                Err(err.into())
            }
        }
    }
}

impl BruteForceGuard for RedisBruteForceGuard {
    fn record_failure(&self, identifier: &str, addr: Option<&str>) -> Result<(), GuardError> {
        let key = guard_key(identifier, addr);
        let failures = self.failures_key(&key);
        let lock = self.lock_key(&key);
        let now = self.clock.now();
        let window = self.window_secs();
        let member = format!("{now}:{}", Uuid::new_v4());
        let max_attempts = self.policy.max_attempts;
        let lockout = self.policy.lockout.as_secs().max(1);

        let locked = self.with_connection(|conn| {
            let (count,): (u32,) = ::redis::pipe()
                .atomic()
                .zadd(&failures, &member, now)
                .ignore()
                .zrembyscore(&failures, "-inf", now.saturating_sub(window))
                .ignore()
                .zcard(&failures)
                .expire(&failures, window.max(1))
                .ignore()
                .query(conn)?;
            if count >= max_attempts {
                let until = now.saturating_add(self.policy.lockout_secs());
                conn.set_ex::<_, _, ()>(&lock, until, lockout)?;
                return Ok(true);
            }
            Ok(false)
        })?;
        debug!(guard_key = %key, locked, "Recorded authentication failure");
        Ok(())
    }

    fn record_success(&self, identifier: &str, addr: Option<&str>) -> Result<(), GuardError> {
        self.reset(identifier, addr)
    }

    fn is_locked(&self, identifier: &str, addr: Option<&str>) -> Result<bool, GuardError> {
        let lock = self.lock_key(&guard_key(identifier, addr));
        self.with_connection(|conn| conn.exists(&lock))
    }

    fn failure_count(&self, identifier: &str, addr: Option<&str>) -> Result<u32, GuardError> {
        let failures = self.failures_key(&guard_key(identifier, addr));
        let lower = format!("({}", self.clock.now().saturating_sub(self.window_secs()));
        self.with_connection(|conn| conn.zcount(&failures, lower, "+inf"))
    }

    fn remaining_lockout_time(
        &self,
        identifier: &str,
        addr: Option<&str>,
    ) -> Result<u64, GuardError> {
        let lock = self.lock_key(&guard_key(identifier, addr));
        let ttl: i64 = self.with_connection(|conn| conn.ttl(&lock))?;
        Ok(u64::try_from(ttl).unwrap_or(0))
    }

    fn reset(&self, identifier: &str, addr: Option<&str>) -> Result<(), GuardError> {
        let key = guard_key(identifier, addr);
        let keys = [self.failures_key(&key), self.lock_key(&key)];
        self.with_connection(|conn| conn.del::<_, ()>(&keys[..]))
    }
}
