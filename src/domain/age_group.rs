//! Age groups
//!
//! Fixed five-way bucketing of patient age. Ages are derived at build time and
//! never stored.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// Age bucket of a patient, in display order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AgeGroup {
    #[serde(rename = "0-17")]
    Minor,
    #[serde(rename = "18-34")]
    YoungAdult,
    #[serde(rename = "35-49")]
    Adult,
    #[serde(rename = "50-64")]
    MiddleAged,
    #[serde(rename = "65+")]
    Senior,
}

/// Exclusive upper bound (in whole years) of each bounded bucket.
/// Anything at or above the last bound is [`AgeGroup::Senior`].
pub const AGE_BOUNDARIES: [(u32, AgeGroup); 4] = [
    (18, AgeGroup::Minor),
    (35, AgeGroup::YoungAdult),
    (50, AgeGroup::Adult),
    (65, AgeGroup::MiddleAged),
];

impl AgeGroup {
    /// All groups in fixed category order
    pub const ALL: [AgeGroup; 5] = [
        AgeGroup::Minor,
        AgeGroup::YoungAdult,
        AgeGroup::Adult,
        AgeGroup::MiddleAged,
        AgeGroup::Senior,
    ];

    /// Bucket for an age in completed years
    pub fn for_age(years: u32) -> Self {
        AGE_BOUNDARIES
            .iter()
            .find(|(upper, _)| years < *upper)
            .map(|(_, group)| *group)
            .unwrap_or(AgeGroup::Senior)
    }

    /// Bucket for a date of birth as of `today`.
    /// A date of birth in the future counts as age zero.
    pub fn for_birth_date(date_of_birth: NaiveDate, today: NaiveDate) -> Self {
        Self::for_age(age_in_years(date_of_birth, today))
    }

    /// Label stored in the aggregate relation
    pub fn label(&self) -> &'static str {
        match self {
            AgeGroup::Minor => "0-17",
            AgeGroup::YoungAdult => "18-34",
            AgeGroup::Adult => "35-49",
            AgeGroup::MiddleAged => "50-64",
            AgeGroup::Senior => "65+",
        }
    }

    /// 1-based position in category order
    pub fn position(&self) -> i16 {
        match self {
            AgeGroup::Minor => 1,
            AgeGroup::YoungAdult => 2,
            AgeGroup::Adult => 3,
            AgeGroup::MiddleAged => 4,
            AgeGroup::Senior => 5,
        }
    }
}

impl fmt::Display for AgeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AgeGroup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgeGroup::ALL
            .into_iter()
            .find(|group| group.label() == s)
            .ok_or_else(|| format!("unknown age group: {}", s))
    }
}

/// Completed calendar years between `date_of_birth` and `today`.
///
/// The birthday itself counts, so a patient is 18 on their 18th birthday.
/// A 29 February birthday is reached on 1 March in non-leap years.
pub fn age_in_years(date_of_birth: NaiveDate, today: NaiveDate) -> u32 {
    if today <= date_of_birth {
        return 0;
    }

    let mut years = today.year() - date_of_birth.year();
    if (today.month(), today.day()) < (date_of_birth.month(), date_of_birth.day()) {
        years -= 1;
    }

    years.max(0) as u32
}

/// Parse a replicated date of birth.
///
/// Accepts `YYYY-MM-DD`, optionally followed by a time part as produced when a
/// timestamp column is rendered as text. Anything else yields `None`.
pub fn parse_birth_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let date_part = raw.get(..10)?;
    let rest = &raw[10..];
    if !rest.is_empty() {
        let time = rest.strip_prefix(' ').or_else(|| rest.strip_prefix('T'))?;
        if !is_time_part(time) {
            return None;
        }
    }
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

/// `HH:MM:SS` with optional fraction and UTC offset. Era suffixes such as
/// `BC` are rejected.
fn is_time_part(raw: &str) -> bool {
    let Some(clock) = raw.get(..8) else {
        return false;
    };
    NaiveTime::parse_from_str(clock, "%H:%M:%S").is_ok()
        && raw[8..]
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '+' | '-' | ':' | 'Z'))
}
