//! Clock Abstraction
//!
//! Wall-clock time flows through the [`Clock`] trait so the same sub-handler
//! logic runs against the system clock in production and against a
//! hand-driven [`ManualClock`] in tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Clock abstraction for time operations
pub trait Clock: Send + Sync + 'static {
    /// Current time as a duration since the UNIX epoch
    fn now(&self) -> Duration;
}

/// Production clock backed by `SystemTime`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Duration {
        // A clock set before 1970 reads as the epoch
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
    }
}

/// Manually advanced clock for deterministic tests
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Duration) -> Self {
        ManualClock {
            nanos: AtomicU64::new(start.as_nanos() as u64),
        }
    }

    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, to: Duration) {
        self.nanos.store(to.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

/// Arc wrapper for trait object usage
pub type SharedClock = Arc<dyn Clock>;

/// Create the production clock
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}
