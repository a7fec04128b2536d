use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::datetime::parse_timestamp;

pub const NO_DUE_DATE: &str = "no due date";

const MS_PER_HOUR: i64 = 60 * 60 * 1000;
/// Due within this many hours (inclusive, overdue included) is red.
const RED_LIMIT_HOURS: i64 = 72;
/// Above the red limit and up to this many hours (inclusive) is amber.
const AMBER_LIMIT_HOURS: i64 = 24 * 7;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    None,
    Green,
    Amber,
    Red,
}

impl Band {
    /// Sort rank, most urgent first.
    pub fn rank(self) -> u8 {
        match self {
            Band::Red => 0,
            Band::Amber => 1,
            Band::Green => 2,
            Band::None => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Band::None => "none",
            Band::Green => "green",
            Band::Amber => "amber",
            Band::Red => "red",
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step function over the time left until `due`. Exactly 72h is red,
/// exactly 168h is amber.
pub fn classify(due: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Band {
    let Some(due) = due else {
        return Band::None;
    };

    let remaining_ms = (due - now).num_milliseconds();
    if remaining_ms <= RED_LIMIT_HOURS * MS_PER_HOUR {
        Band::Red
    } else if remaining_ms <= AMBER_LIMIT_HOURS * MS_PER_HOUR {
        Band::Amber
    } else {
        Band::Green
    }
}

pub fn classify_raw(due: Option<&str>, now: DateTime<Utc>) -> Band {
    classify(due.and_then(parse_timestamp), now)
}

/// `{d}d {h}h {m}m` until `due`. Days are dropped when zero and hours when
/// both days and hours are zero; overdue tasks read `0m`.
pub fn countdown(due: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(due) = due else {
        return NO_DUE_DATE.to_string();
    };

    let total_minutes = (due - now).num_minutes().max(0);
    let days = total_minutes / (60 * 24);
    let hours = (total_minutes - days * 60 * 24) / 60;
    let minutes = total_minutes % 60;

    let mut parts = Vec::with_capacity(3);
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if days > 0 || hours > 0 {
        parts.push(format!("{hours}h"));
    }
    parts.push(format!("{minutes}m"));
    parts.join(" ")
}

pub fn countdown_raw(due: Option<&str>, now: DateTime<Utc>) -> String {
    countdown(due.and_then(parse_timestamp), now)
}
