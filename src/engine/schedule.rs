use std::collections::HashMap;

use chrono::{Local, NaiveDate, NaiveDateTime, Timelike};

use crate::config::DatabaseDescriptor;

/// Source of the current local date and time.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

/// The local wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock standing still at the given time.
impl Clock for NaiveDateTime {
    fn now(&self) -> NaiveDateTime {
        *self
    }
}

/// Returns if `now` lies within the scheduled minute of `database`.
///
/// Seconds are ignored, so every call within the scheduled minute matches. Callers
/// polling more often than once a minute have to avoid duplicate backups themselves.
pub fn should_run_now(database: &DatabaseDescriptor, now: &impl Timelike) -> bool {
    database.start_time.matches(now)
}

/// Minute in which each database was last dumped.
///
/// Keeps a polling driver from dumping a database more than once within its scheduled
/// minute, regardless of how often it polls.
#[derive(Debug, Clone, Default)]
pub struct RunLedger {
    last_dumped: HashMap<String, (NaiveDate, u32, u32)>,
}

impl RunLedger {
    /// Returns if `database` was already dumped in the minute of `now`.
    pub fn dumped_this_minute(&self, database: &str, now: &NaiveDateTime) -> bool {
        self.last_dumped.get(database) == Some(&minute_of(now))
    }

    pub fn record(&mut self, database: &str, now: &NaiveDateTime) {
        self.last_dumped.insert(database.to_string(), minute_of(now));
    }
}

fn minute_of(time: &NaiveDateTime) -> (NaiveDate, u32, u32) {
    (time.date(), time.hour(), time.minute())
}
