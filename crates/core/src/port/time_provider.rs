// Time Provider Port (for testability)

/// Time provider interface (allows mocking in tests)
pub trait TimeProvider: Send + Sync {
    /// Get current time in milliseconds since epoch
    fn now_millis(&self) -> i64;
}

/// System time provider (production)
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Manually driven clock
    pub struct ManualTimeProvider {
        now: AtomicI64,
    }

    impl ManualTimeProvider {
        pub fn new(start_millis: i64) -> Self {
            Self {
                now: AtomicI64::new(start_millis),
            }
        }

        pub fn set(&self, millis: i64) {
            self.now.store(millis, Ordering::SeqCst);
        }

        pub fn advance(&self, millis: i64) {
            self.now.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl TimeProvider for ManualTimeProvider {
        fn now_millis(&self) -> i64 {
            self.now.load(Ordering::SeqCst)
        }
    }

    /// Clock that follows tokio's (pausable) time source
    ///
    /// Use with `#[tokio::test(start_paused = true)]` so epoch millis and
    /// tokio timers advance together.
    pub struct TokioTimeProvider {
        origin: tokio::time::Instant,
        origin_millis: i64,
    }

    impl TokioTimeProvider {
        pub fn new(origin_millis: i64) -> Self {
            Self {
                origin: tokio::time::Instant::now(),
                origin_millis,
            }
        }
    }

    impl TimeProvider for TokioTimeProvider {
        fn now_millis(&self) -> i64 {
            self.origin_millis + self.origin.elapsed().as_millis() as i64
        }
    }
}
