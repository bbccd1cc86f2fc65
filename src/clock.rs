use std::time::Instant;

use chrono::Datelike;

/// Monotonic milliseconds, for intervals and timeouts only.
pub trait Clock: Send {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Date {
    pub day: u32,
    pub month: u32,
    pub year: i32,
}

/// Local calendar date, for energy rollover. `None` if the wall clock is
/// not usable yet.
pub trait Calendar: Send {
    fn today(&self) -> Option<Date>;
}

#[derive(Debug, Clone)]
pub struct SystemClock {
    started: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalCalendar;

impl Calendar for LocalCalendar {
    fn today(&self) -> Option<Date> {
        let now = chrono::Local::now();
        Some(Date {
            day: now.day(),
            month: now.month(),
            year: now.year(),
        })
    }
}
