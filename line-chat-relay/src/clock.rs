//! Wall-clock source for chat timestamps.

use chrono::{Local, NaiveTime};

/// Supplies the local time stamped onto chat lines.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveTime {
        Local::now().time()
    }
}

/// Always reports the same time. Used by tests that assert on chat lines.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    time: NaiveTime,
}

impl FixedClock {
    pub fn new(time: NaiveTime) -> Self {
        Self { time }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveTime {
        self.time
    }
}
