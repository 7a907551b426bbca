use std::fmt;
use std::str::FromStr;

use chrono::{NaiveTime, Timelike};
use derive_more::{Display, Error};

/// A database to back up together with its daily backup time.
#[derive(Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DatabaseDescriptor {
    /// Name of the database on the server.
    pub name: String,
    /// Host of the database server.
    pub host: String,
    /// User used by the dump tool.
    pub user: String,
    /// Password of [`user`](Self::user).
    pub password: String,
    /// Time of day the backup is scheduled at.
    pub start_time: ScheduleTime,
}

impl fmt::Debug for DatabaseDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseDescriptor")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &"***")
            .field("start_time", &self.start_time)
            .finish()
    }
}

/// Time of day in minute resolution on a 24-hour clock.
///
/// Parsed from `HH:MM` or `HH:MM:SS`, seconds are dropped.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScheduleTime {
    hour: u32,
    minute: u32,
}

/// The time of day is not a valid `HH:MM` value.
#[derive(Debug, Display, Error)]
#[display("Invalid time of day (expected HH:MM): {_0}")]
pub struct InvalidScheduleTime(#[error(ignore)] String);

impl ScheduleTime {
    /// Creates a [ScheduleTime], if `hour` and `minute` are on the 24-hour clock.
    pub fn new(hour: u32, minute: u32) -> Result<Self, InvalidScheduleTime> {
        if hour < 24 && minute < 60 {
            Ok(Self { hour, minute })
        } else {
            Err(InvalidScheduleTime(format!("{hour}:{minute}")))
        }
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    /// Returns if `time` lies within the scheduled minute.
    pub fn matches(&self, time: &impl Timelike) -> bool {
        time.hour() == self.hour && time.minute() == self.minute
    }
}

impl fmt::Display for ScheduleTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for ScheduleTime {
    type Err = InvalidScheduleTime;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let time = NaiveTime::parse_from_str(s, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
            .map_err(|_| InvalidScheduleTime(s.to_string()))?;

        Self::new(time.hour(), time.minute())
    }
}

impl TryFrom<String> for ScheduleTime {
    type Error = InvalidScheduleTime;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ScheduleTime> for String {
    fn from(value: ScheduleTime) -> Self {
        value.to_string()
    }
}

/// Source of the databases to back up.
///
/// [`databases`](Registry::databases) must return the databases in a stable order
/// between calls. Backups of a pass are performed one after another in exactly this order.
pub trait Registry {
    /// All configured databases in backup order.
    fn databases(&self) -> &[DatabaseDescriptor];

    /// Looks up a database by its name.
    fn database(&self, name: &str) -> Option<&DatabaseDescriptor> {
        self.databases().iter().find(|database| database.name == name)
    }
}

impl Registry for Vec<DatabaseDescriptor> {
    fn databases(&self) -> &[DatabaseDescriptor] {
        self
    }
}
