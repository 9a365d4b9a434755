use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::time_range::{
    TimeInterval, TimeRangeError, format_display_date, format_time_range, parse_time_range,
    strip_enclosing_parentheses,
};

static TIME_ONLY_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\(?\s*\d{1,2}(?:[:.]\d{2})?\s*(?:[ap]\.?m\.?)?\s*[-\x{2013}\x{2014}]\s*\d{1,2}(?:[:.]\d{2})?\s*(?:[ap]\.?m\.?)?\s*\)?$",
    )
    .expect("time-only pattern is valid")
});

static DATE_LEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\d{1,2}(?:st|nd|rd|th)?\s+[a-z]+").expect("date lead pattern is valid")
});

static TIME_MENTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\d(?:[:.]\d{2})?\s*[ap]\.?m\b|\d{1,2}[:.]\d{2}")
        .expect("time mention pattern is valid")
});

static ORDINAL_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})(?:st|nd|rd|th)\b").expect("ordinal pattern is valid")
});

static DISPLAY_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})\s+([A-Za-z]+)\.?,?(?:\s+(\d{4}))?(?:\s+|$)(.*)$")
        .expect("display date pattern is valid")
});

static WEEKDAY_QUALIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\(\s*(?:mon|tue|wed|thu|fri|sat|sun)[a-z]*\.?\s*\)")
        .expect("weekday pattern is valid")
});

const MONTHS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SlotParseError {
    #[error("slot does not start with a day and month: {0:?}")]
    MissingDate(String),
    #[error("unknown month name {0:?}")]
    UnknownMonth(String),
    #[error("not a calendar date: {0:?}")]
    InvalidDate(String),
    #[error("slot has no time range: {0:?}")]
    MissingTime(String),
    #[error("invalid slot time: {0}")]
    InvalidTime(#[from] TimeRangeError),
}

/// A candidate meeting window on one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub date: NaiveDate,
    #[serde(with = "clock_time")]
    pub start_time: NaiveTime,
    #[serde(with = "clock_time")]
    pub end_time: NaiveTime,
}

/// The `{date, time}` pair recovered from already-stored slot text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplaySlot {
    pub date: NaiveDate,
    pub time: Option<String>,
}

impl Slot {
    pub fn new(date: NaiveDate, start_time: NaiveTime, end_time: NaiveTime) -> Option<Self> {
        (start_time < end_time).then_some(Self {
            date,
            start_time,
            end_time,
        })
    }

    pub fn display_text(&self) -> String {
        format!(
            "{} {}",
            format_display_date(self.date),
            self.time_range_text()
        )
    }

    pub fn time_range_text(&self) -> String {
        format_time_range(self.start_time, self.end_time)
    }

    /// `None` when the window is empty, which only a hand-built or deserialized slot can be.
    pub fn interval(&self) -> Option<TimeInterval> {
        TimeInterval::from_times(self.start_time, self.end_time, self.time_range_text())
    }

    /// Parses `"12 June 2025 2pm-3pm"` style text; the time range is required.
    pub fn from_display(token: &str, default_year: i32) -> Result<Self, SlotParseError> {
        let display = parse_display_slot(token, default_year)?;
        let time = display
            .time
            .ok_or_else(|| SlotParseError::MissingTime(token.to_string()))?;
        let interval = parse_time_range(&time)?;

        Ok(Self {
            date: display.date,
            start_time: interval.start_time(),
            end_time: interval.end_time(),
        })
    }

    pub fn contains(&self, other: &Slot) -> bool {
        self.date == other.date
            && self.start_time <= other.start_time
            && other.end_time <= self.end_time
    }
}

/// Merges free-standing time ranges into the date entries that follow them.
///
/// A time-only entry is remembered and dropped; every later entry that starts with a
/// day and month but carries no time of its own gets the remembered range appended.
pub fn normalize_slot_entries<S: AsRef<str>>(entries: &[S]) -> Vec<String> {
    let mut last_seen_time: Option<String> = None;
    let mut normalized = Vec::with_capacity(entries.len());

    for entry in entries {
        let entry = entry.as_ref().trim();
        if entry.is_empty() {
            continue;
        }

        if TIME_ONLY_ENTRY.is_match(entry) {
            last_seen_time = Some(entry.to_string());
            continue;
        }

        match &last_seen_time {
            Some(time) if DATE_LEAD.is_match(entry) && !TIME_MENTION.is_match(entry) => {
                normalized.push(format!("{entry} {time}"));
            }
            _ => {
                if !DATE_LEAD.is_match(entry) {
                    tracing::debug!(entry, "slot entry has no leading date; kept verbatim");
                }
                normalized.push(entry.to_string());
            }
        }
    }

    normalized
}

pub fn strip_ordinal_suffixes(text: &str) -> String {
    ORDINAL_SUFFIX.replace_all(text, "$1").into_owned()
}

/// Splits a stored `"<date> <time>"` token back into its date and optional time.
pub fn parse_display_slot(token: &str, default_year: i32) -> Result<DisplaySlot, SlotParseError> {
    let cleaned = strip_ordinal_suffixes(token.trim());
    let captures = DISPLAY_DATE
        .captures(&cleaned)
        .ok_or_else(|| SlotParseError::MissingDate(token.to_string()))?;

    let day: u32 = captures[1]
        .parse()
        .map_err(|_| SlotParseError::InvalidDate(token.to_string()))?;
    let month = month_number(&captures[2])
        .ok_or_else(|| SlotParseError::UnknownMonth(captures[2].to_string()))?;
    let year = match captures.get(3) {
        Some(year) => year
            .as_str()
            .parse()
            .map_err(|_| SlotParseError::InvalidDate(token.to_string()))?,
        None => default_year,
    };
    let date = NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| SlotParseError::InvalidDate(token.to_string()))?;

    let remainder = captures.get(4).map_or("", |rest| rest.as_str());
    let remainder = WEEKDAY_QUALIFIER.replace_all(remainder, "");
    let time = strip_enclosing_parentheses(&remainder);

    Ok(DisplaySlot {
        date,
        time: (!time.is_empty()).then(|| time.to_string()),
    })
}

/// Builds a slot entry from a reply that only names the original session and a new time.
///
/// `"12 June 2025 (2pm – 3pm)"` with `"4pm-5pm"` becomes `"12 June 2025 (4pm-5pm)"`.
pub fn derive_slot_from_change(original_session: &str, new_time: &str) -> Option<String> {
    let new_time = new_time.trim();
    if new_time.is_empty() {
        return None;
    }

    let cleaned = original_session.replace(['\u{2013}', '\u{2014}', '\u{2015}'], "-");
    let (date, _) = cleaned.trim().split_once('(')?;
    let date = date.trim();

    (!date.is_empty()).then(|| format!("{date} ({new_time})"))
}

fn month_number(word: &str) -> Option<u32> {
    let word = word.to_ascii_lowercase();
    if word.len() < 3 {
        return None;
    }

    MONTHS
        .iter()
        .position(|month| month.starts_with(&word))
        .map(|index| index as u32 + 1)
}

mod clock_time {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(raw.trim(), "%H:%M"))
            .map_err(|_| D::Error::custom(format!("invalid time of day: {raw}")))
    }
}
