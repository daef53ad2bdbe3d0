//! Bounded-wait mutual exclusion over the persistent storage device.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};

use crate::core::errors::{Result, SdcError};

/// Process-wide storage lock. Shared as an `Arc<StorageLock>`; never global.
///
/// At most one holder at a time. Acquisition waits at most `timeout` and
/// never blocks forever. The lock is not reentrant: acquiring it again on the
/// same thread while holding a guard will time out.
pub struct StorageLock {
    inner: Mutex<()>,
    timeout: Duration,
    acquisitions: AtomicU64,
    timeouts: AtomicU64,
}

impl StorageLock {
    /// Create the lock. A zero timeout is rejected.
    pub fn new(timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(SdcError::InvalidConfig {
                details: "storage lock timeout must be > 0".to_string(),
            });
        }
        Ok(Self {
            inner: Mutex::new(()),
            timeout,
            acquisitions: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Acquire with the configured timeout.
    pub fn acquire(&self, operation: &'static str) -> Result<StorageGuard<'_>> {
        self.acquire_within(operation, self.timeout)
    }

    /// Acquire with an explicit timeout.
    pub fn acquire_within(
        &self,
        operation: &'static str,
        timeout: Duration,
    ) -> Result<StorageGuard<'_>> {
        let started = Instant::now();
        match self.inner.try_lock_for(timeout) {
            Some(guard) => {
                self.acquisitions.fetch_add(1, Ordering::Relaxed);
                Ok(StorageGuard {
                    _guard: guard,
                    operation,
                    acquired_at: Instant::now(),
                })
            }
            None => {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                Err(SdcError::LockTimeout {
                    operation,
                    waited: started.elapsed(),
                })
            }
        }
    }

    /// Whether some holder currently owns the lock.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.inner.is_locked()
    }

    #[must_use]
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for StorageLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageLock")
            .field("timeout", &self.timeout)
            .field("held", &self.is_held())
            .field("acquisitions", &self.acquisitions())
            .field("timeouts", &self.timeouts())
            .finish()
    }
}

/// Proof of exclusive storage access. Releases on drop.
pub struct StorageGuard<'a> {
    _guard: MutexGuard<'a, ()>,
    operation: &'static str,
    acquired_at: Instant,
}

impl StorageGuard<'_> {
    #[must_use]
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    #[must_use]
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl fmt::Debug for StorageGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageGuard")
            .field("operation", &self.operation)
            .field("held_for", &self.held_for())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn zero_timeout_rejected() {
        let err = StorageLock::new(Duration::ZERO).unwrap_err();
        assert_eq!(err.code(), "SDC-1001");
    }

    #[test]
    fn guard_releases_on_drop() {
        let lock = StorageLock::new(Duration::from_millis(50)).unwrap();
        {
            let guard = lock.acquire("read_all").unwrap();
            assert_eq!(guard.operation(), "read_all");
            assert!(lock.is_held());
        }
        assert!(!lock.is_held());
        assert!(lock.acquire("read_all").is_ok());
        assert_eq!(lock.acquisitions(), 2);
    }

    #[test]
    fn second_acquirer_times_out_while_held() {
        let lock = Arc::new(StorageLock::new(Duration::from_millis(30)).unwrap());
        let guard = lock.acquire("holder").unwrap();

        let contender = Arc::clone(&lock);
        let result = thread::spawn(move || contender.acquire("contender").map(|_| ()))
            .join()
            .unwrap();
        let err = result.unwrap_err();
        assert!(matches!(err, SdcError::LockTimeout { operation: "contender", .. }));
        assert!(err.is_retryable());
        assert_eq!(lock.timeouts(), 1);
        drop(guard);
    }

    #[test]
    fn not_reentrant_on_same_thread() {
        let lock = StorageLock::new(Duration::from_millis(10)).unwrap();
        let _held = lock.acquire("outer").unwrap();
        assert!(lock.acquire("inner").is_err());
    }

    #[test]
    fn waiter_proceeds_after_release() {
        let lock = Arc::new(StorageLock::new(Duration::from_secs(2)).unwrap());
        let guard = lock.acquire("holder").unwrap();
        let waiter = Arc::clone(&lock);
        let handle = thread::spawn(move || waiter.acquire("waiter").map(|_| ()));
        thread::sleep(Duration::from_millis(20));
        drop(guard);
        assert!(handle.join().unwrap().is_ok());
    }
}
