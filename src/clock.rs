use chrono::{Local, Timelike};

/// Source of the wall-clock hour used by time-gated admission rules.
pub trait Clock: Send + Sync {
    /// Current local hour, 0..=23.
    fn current_hour(&self) -> u32;
}

/// The host's local time.
#[derive(Copy, Clone, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn current_hour(&self) -> u32 {
        Local::now().hour()
    }
}

/// A clock stuck at one hour.
#[derive(Copy, Clone, Debug)]
pub struct FixedClock(pub u32);

impl Clock for FixedClock {
    fn current_hour(&self) -> u32 {
        self.0
    }
}
