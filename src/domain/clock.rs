use chrono::{DateTime, Utc};

/// Injectable source of wall-clock time. Every time read in the control
/// plane routes through this trait so tests can drive deterministic
/// scheduling without sleeping real wall-clock seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// `Clock` backed by the OS wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Not behind `#[cfg(test)]`: integration tests under `tests/` depend on
/// this crate as an external consumer, where `cfg(test)` items of the
/// library are invisible.
pub mod test_support {
    use super::*;
    use std::sync::RwLock;

    /// A `Clock` whose reading is set explicitly by tests and never
    /// advances on its own.
    pub struct FakeClock {
        current: RwLock<DateTime<Utc>>,
    }

    impl FakeClock {
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                current: RwLock::new(start),
            }
        }

        pub fn advance(&self, delta: chrono::Duration) {
            let mut guard = self.current.write().unwrap();
            *guard += delta;
        }

        pub fn set(&self, at: DateTime<Utc>) {
            *self.current.write().unwrap() = at;
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> DateTime<Utc> {
            *self.current.read().unwrap()
        }
    }
}
