use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{
    guard_key, BruteForceGuard, Clock, FailureRecord, GuardError, SystemClock, ThrottlePolicy,
};

/// File backed guard, one `{key}.json` record per hashed key.
///
/// Readers take a shared lock, writers an exclusive lock held across the whole
/// read-modify-write cycle. Both block until the lock is available.
#[derive(Clone)]
pub struct FileBruteForceGuard {
    directory: PathBuf,
    policy: ThrottlePolicy,
    clock: Arc<dyn Clock>,
}

impl FileBruteForceGuard {
    /// # Errors
    /// Returns an error if the storage directory cannot be created.
    pub fn new(directory: impl Into<PathBuf>, policy: ThrottlePolicy) -> Result<Self, GuardError> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        Ok(Self {
            directory,
            policy,
            clock: Arc::new(SystemClock),
        })
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.directory.join(format!("{key}.json"))
    }

    fn read(&self, key: &str) -> Result<FailureRecord, GuardError> {
        let path = self.record_path(key);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(FailureRecord::default()),
            Err(err) => return Err(err.into()),
        };
        FileExt::lock_shared(&file)?;
        let mut contents = String::new();
        let read = file.read_to_string(&mut contents);
        FileExt::unlock(&file)?;
        read?;
        Ok(decode(&path, &contents))
    }

    fn update<T>(
        &self,
        key: &str,
        apply: impl FnOnce(&mut FailureRecord, i64) -> T,
    ) -> Result<T, GuardError> {
        let path = self.record_path(key);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        FileExt::lock_exclusive(&file)?;
        let result = Self::rewrite(&mut file, &path, self.clock.now(), apply);
        FileExt::unlock(&file)?;
        result
    }

    fn rewrite<T>(
        file: &mut File,
        path: &Path,
        now: i64,
        apply: impl FnOnce(&mut FailureRecord, i64) -> T,
    ) -> Result<T, GuardError> {
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let mut record = decode(path, &contents);
        let result = apply(&mut record, now);
        let encoded = serde_json::to_vec(&record)?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&encoded)?;
        file.flush()?;
        file.sync_data()?;
        Ok(result)
    }
}

fn decode(path: &Path, contents: &str) -> FailureRecord {
    if contents.trim().is_empty() {
        return FailureRecord::default();
    }
    serde_json::from_str(contents).unwrap_or_else(|err| {
        warn!(path = %path.display(), "Resetting corrupt guard record: {err}");
        FailureRecord::default()
    })
}

impl BruteForceGuard for FileBruteForceGuard {
    fn record_failure(&self, identifier: &str, addr: Option<&str>) -> Result<(), GuardError> {
        let key = guard_key(identifier, addr);
        let policy = self.policy;
        let locked = self.update(&key, |record, now| {
            record.register_failure(now, &policy);
            record.is_locked(now)
        })?;
        debug!(guard_key = %key, locked, "Recorded authentication failure");
        Ok(())
    }

    fn record_success(&self, identifier: &str, addr: Option<&str>) -> Result<(), GuardError> {
        self.reset(identifier, addr)
    }

    fn is_locked(&self, identifier: &str, addr: Option<&str>) -> Result<bool, GuardError> {
        let record = self.read(&guard_key(identifier, addr))?;
        Ok(record.is_locked(self.clock.now()))
    }

    fn failure_count(&self, identifier: &str, addr: Option<&str>) -> Result<u32, GuardError> {
        let record = self.read(&guard_key(identifier, addr))?;
        Ok(record.failure_count(self.clock.now(), &self.policy))
    }

    fn remaining_lockout_time(
        &self,
        identifier: &str,
        addr: Option<&str>,
    ) -> Result<u64, GuardError> {
        let key = guard_key(identifier, addr);
        let record = self.read(&key)?;
        let now = self.clock.now();
        if record.locked_until.is_some() && !record.is_locked(now) {
            self.update(&key, |record, now| record.clear_expired_lock(now))?;
            return Ok(0);
        }
        Ok(record.remaining_lockout(now))
    }

    fn reset(&self, identifier: &str, addr: Option<&str>) -> Result<(), GuardError> {
        let key = guard_key(identifier, addr);
        if !self.record_path(&key).exists() {
            return Ok(());
        }
        self.update(&key, |record, _| *record = FailureRecord::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::brute_force::ManualClock;
    use std::time::Duration;

    fn guard(dir: &Path, clock: Arc<ManualClock>) -> anyhow::Result<FileBruteForceGuard> {
        let policy = ThrottlePolicy {
            max_attempts: 5,
            window: Duration::from_secs(900),
            lockout: Duration::from_secs(900),
        };
        Ok(FileBruteForceGuard::new(dir, policy)?.with_clock(clock))
    }

    #[test]
    fn locks_after_max_attempts_and_success_clears() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let clock = Arc::new(ManualClock::new(1_000));
        let guard = guard(dir.path(), clock.clone())?;

        for _ in 0..4 {
            guard.record_failure("alice", Some("10.0.0.1"))?;
        }
        assert!(!guard.is_locked("alice", Some("10.0.0.1"))?);
        guard.record_failure("alice", Some("10.0.0.1"))?;
        assert!(guard.is_locked("alice", Some("10.0.0.1"))?);
        assert_eq!(guard.remaining_lockout_time("alice", Some("10.0.0.1"))?, 900);
        assert!(!guard.is_locked("alice", Some("10.0.0.2"))?);

        guard.record_success("alice", Some("10.0.0.1"))?;
        assert!(!guard.is_locked("alice", Some("10.0.0.1"))?);
        assert_eq!(guard.failure_count("alice", Some("10.0.0.1"))?, 0);
        Ok(())
    }

    #[test]
    fn lock_expires_and_is_cleaned_lazily() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let clock = Arc::new(ManualClock::new(0));
        let guard = guard(dir.path(), clock.clone())?;
        for _ in 0..5 {
            guard.record_failure("bob", None)?;
        }
        clock.advance(Duration::from_secs(901));
        assert!(!guard.is_locked("bob", None)?);
        assert_eq!(guard.remaining_lockout_time("bob", None)?, 0);

        let contents = fs::read_to_string(guard.record_path(&guard_key("bob", None)))?;
        let record: FailureRecord = serde_json::from_str(&contents)?;
        assert_eq!(record.locked_until, None);
        Ok(())
    }

    #[test]
    fn files_never_contain_raw_identifiers() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let guard = guard(dir.path(), Arc::new(ManualClock::new(0)))?;
        guard.record_failure("carol@example.com", Some("192.0.2.1"))?;
        for entry in fs::read_dir(dir.path())? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            assert!(!name.contains("carol"));
            assert!(!fs::read_to_string(entry.path())?.contains("carol"));
        }
        Ok(())
    }

    #[test]
    fn corrupt_record_is_treated_as_empty() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let guard = guard(dir.path(), Arc::new(ManualClock::new(0)))?;
        fs::write(guard.record_path(&guard_key("dave", None)), "{oops")?;
        assert_eq!(guard.failure_count("dave", None)?, 0);
        guard.record_failure("dave", None)?;
        assert_eq!(guard.failure_count("dave", None)?, 1);
        Ok(())
    }
}
