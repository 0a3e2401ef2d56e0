//! Time windows and counter records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Time window for a rate rule.
///
/// Deserializes from a unit name (`"minute"`) or from a number of seconds
/// for custom windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "WindowRepr", into = "WindowRepr")]
pub enum TimeWindow {
    /// Per-second rate limiting
    Second,
    /// Per-minute rate limiting
    Minute,
    /// Per-hour rate limiting
    Hour,
    /// Per-day rate limiting
    Day,
    /// Per-week rate limiting
    Week,
    /// Custom window length in seconds
    Custom(u64),
}

impl TimeWindow {
    /// Get the length of this time window in seconds.
    pub fn as_secs(&self) -> u64 {
        match self {
            TimeWindow::Second => 1,
            TimeWindow::Minute => 60,
            TimeWindow::Hour => 3_600,
            TimeWindow::Day => 86_400,
            TimeWindow::Week => 604_800,
            TimeWindow::Custom(secs) => *secs,
        }
    }

    /// Get the duration of this time window.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.as_secs())
    }

    /// The tag used in counter keys and telemetry names.
    pub fn tag(&self) -> String {
        match self {
            TimeWindow::Second => "second".to_string(),
            TimeWindow::Minute => "minute".to_string(),
            TimeWindow::Hour => "hour".to_string(),
            TimeWindow::Day => "day".to_string(),
            TimeWindow::Week => "week".to_string(),
            TimeWindow::Custom(secs) => secs.to_string(),
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum NamedWindow {
    Second,
    Minute,
    Hour,
    Day,
    Week,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
enum WindowRepr {
    Named(NamedWindow),
    Seconds(u64),
}

impl TryFrom<WindowRepr> for TimeWindow {
    type Error = String;

    fn try_from(repr: WindowRepr) -> std::result::Result<Self, Self::Error> {
        Ok(match repr {
            WindowRepr::Named(NamedWindow::Second) => TimeWindow::Second,
            WindowRepr::Named(NamedWindow::Minute) => TimeWindow::Minute,
            WindowRepr::Named(NamedWindow::Hour) => TimeWindow::Hour,
            WindowRepr::Named(NamedWindow::Day) => TimeWindow::Day,
            WindowRepr::Named(NamedWindow::Week) => TimeWindow::Week,
            WindowRepr::Seconds(0) => {
                return Err("custom time unit must be at least 1 second".to_string())
            }
            WindowRepr::Seconds(secs) => TimeWindow::Custom(secs),
        })
    }
}

impl From<TimeWindow> for WindowRepr {
    fn from(window: TimeWindow) -> Self {
        match window {
            TimeWindow::Second => WindowRepr::Named(NamedWindow::Second),
            TimeWindow::Minute => WindowRepr::Named(NamedWindow::Minute),
            TimeWindow::Hour => WindowRepr::Named(NamedWindow::Hour),
            TimeWindow::Day => WindowRepr::Named(NamedWindow::Day),
            TimeWindow::Week => WindowRepr::Named(NamedWindow::Week),
            TimeWindow::Custom(secs) => WindowRepr::Seconds(secs),
        }
    }
}

/// The state of one counting bucket as reported by a counter store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterRecord {
    /// Hits recorded in the current window, including the one just added
    pub total_hits: u64,
    /// Seconds until the window resets, relative to the time of the call
    pub time_to_expire: u64,
}

impl CounterRecord {
    /// Build a record from a remaining duration.
    ///
    /// Partial seconds round up so a live window never reports zero.
    pub fn new(total_hits: u64, remaining: Duration) -> Self {
        let mut secs = remaining.as_secs();
        if remaining.subsec_nanos() > 0 {
            secs += 1;
        }
        Self {
            total_hits,
            time_to_expire: secs,
        }
    }
}
