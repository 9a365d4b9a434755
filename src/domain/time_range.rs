use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::Serialize;
use thiserror::Error;

/// Hyphen, en dash and em dash, in the order they are accepted as separators.
pub const DASH_GLYPHS: [char; 3] = ['-', '\u{2013}', '\u{2014}'];

const MINUTES_PER_HOUR: u16 = 60;
const HALF_DAY_MINUTES: u16 = 720;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeInterval {
    pub start_minutes: u16,
    pub end_minutes: u16,
    pub source_text: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimeRangeError {
    #[error("time range is empty")]
    Empty,
    #[error("no dash separator in time range: {0:?}")]
    MissingSeparator(String),
    #[error("time range must have exactly two sides: {0:?}")]
    MalformedRange(String),
    #[error("invalid clock time {0:?}")]
    InvalidClockTime(String),
    #[error("am/pm cannot be inferred for {0:?}")]
    AmbiguousMeridiem(String),
    #[error("time range does not end after it starts: {0:?}")]
    InvertedRange(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Meridiem {
    Am,
    Pm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ClockTime {
    hour: u16,
    minute: u16,
    meridiem: Option<Meridiem>,
}

impl ClockTime {
    fn minutes_of_day(self) -> u16 {
        let base = self.hour * MINUTES_PER_HOUR + self.minute;
        match self.meridiem {
            Some(Meridiem::Pm) if self.hour != 12 => base + HALF_DAY_MINUTES,
            Some(Meridiem::Am) if self.hour == 12 => base - HALF_DAY_MINUTES,
            _ => base,
        }
    }

    fn is_twelve_hour(self) -> bool {
        (1..=12).contains(&self.hour)
    }

    /// Position on a 12-hour dial, with 12 o'clock as zero.
    fn dial_minutes(self) -> u16 {
        (self.hour % 12) * MINUTES_PER_HOUR + self.minute
    }

    fn with_meridiem(self, meridiem: Meridiem) -> Self {
        Self {
            meridiem: Some(meridiem),
            ..self
        }
    }
}

impl TimeInterval {
    /// Parses a range, returning `None` for anything that cannot be evaluated.
    pub fn parse(text: &str) -> Option<Self> {
        parse_time_range(text).ok()
    }

    pub fn from_times(
        start: NaiveTime,
        end: NaiveTime,
        source_text: impl Into<String>,
    ) -> Option<Self> {
        let start_minutes = minutes_of(start);
        let end_minutes = minutes_of(end);
        (start_minutes < end_minutes).then(|| Self {
            start_minutes,
            end_minutes,
            source_text: source_text.into(),
        })
    }

    /// Open-interval overlap: a session ending exactly when another starts does not collide.
    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.start_minutes < other.end_minutes && other.start_minutes < self.end_minutes
    }

    pub fn start_time(&self) -> NaiveTime {
        time_of(self.start_minutes)
    }

    pub fn end_time(&self) -> NaiveTime {
        time_of(self.end_minutes)
    }

    /// Canonical `h[:mm]am/pm-h[:mm]am/pm` rendering of the interval.
    pub fn display_text(&self) -> String {
        format_time_range(self.start_time(), self.end_time())
    }
}

pub fn parse_time_range(text: &str) -> Result<TimeInterval, TimeRangeError> {
    let stripped = strip_enclosing_parentheses(text);
    if stripped.is_empty() {
        return Err(TimeRangeError::Empty);
    }

    let dash = stripped
        .chars()
        .find(|char| DASH_GLYPHS.contains(char))
        .ok_or_else(|| TimeRangeError::MissingSeparator(text.to_string()))?;

    let halves: Vec<&str> = stripped.split(dash).collect();
    if halves.len() != 2 || halves.iter().any(|half| half.trim().is_empty()) {
        return Err(TimeRangeError::MalformedRange(text.to_string()));
    }

    let start = parse_clock_time(halves[0])
        .ok_or_else(|| TimeRangeError::InvalidClockTime(halves[0].trim().to_string()))?;
    let end = parse_clock_time(halves[1])
        .ok_or_else(|| TimeRangeError::InvalidClockTime(halves[1].trim().to_string()))?;

    let (start_minutes, end_minutes) = resolve_meridiem(start, end)
        .ok_or_else(|| TimeRangeError::AmbiguousMeridiem(text.to_string()))?;

    if start_minutes >= end_minutes {
        return Err(TimeRangeError::InvertedRange(text.to_string()));
    }

    Ok(TimeInterval {
        start_minutes,
        end_minutes,
        source_text: text.trim().to_string(),
    })
}

/// Renders a time as `2pm` or `3:30pm`.
pub fn format_time_of_day(time: NaiveTime) -> String {
    let (is_pm, hour) = time.hour12();
    let suffix = if is_pm { "pm" } else { "am" };
    match time.minute() {
        0 => format!("{hour}{suffix}"),
        minute => format!("{hour}:{minute:02}{suffix}"),
    }
}

pub fn format_time_range(start: NaiveTime, end: NaiveTime) -> String {
    format!("{}-{}", format_time_of_day(start), format_time_of_day(end))
}

/// Renders a date as `12 June 2025`.
pub fn format_display_date(date: NaiveDate) -> String {
    date.format("%-d %B %Y").to_string()
}

pub(crate) fn strip_enclosing_parentheses(text: &str) -> &str {
    text.trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .trim()
}

fn parse_clock_time(half: &str) -> Option<ClockTime> {
    let compact: String = half
        .chars()
        .filter(|char| !char.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();

    let (digits, meridiem) = split_meridiem(&compact);
    let (hour_text, minute_text) = match digits.split_once([':', '.']) {
        Some((hour, minute)) => (hour, Some(minute)),
        None => (digits, None),
    };

    let hour = parse_digits(hour_text, 1..=2)?;
    let minute = match minute_text {
        Some(text) => parse_digits(text, 2..=2)?,
        None => 0,
    };

    let hour_in_range = match meridiem {
        Some(_) => (1..=12).contains(&hour),
        None => hour <= 23,
    };
    if !hour_in_range || minute > 59 {
        return None;
    }

    Some(ClockTime {
        hour,
        minute,
        meridiem,
    })
}

fn split_meridiem(text: &str) -> (&str, Option<Meridiem>) {
    const SUFFIXES: &[(&str, Meridiem)] = &[
        ("a.m.", Meridiem::Am),
        ("p.m.", Meridiem::Pm),
        ("am", Meridiem::Am),
        ("pm", Meridiem::Pm),
    ];

    SUFFIXES
        .iter()
        .find_map(|(suffix, meridiem)| {
            text.strip_suffix(*suffix)
                .map(|rest| (rest, Some(*meridiem)))
        })
        .unwrap_or((text, None))
}

fn parse_digits(text: &str, length: std::ops::RangeInclusive<usize>) -> Option<u16> {
    if !length.contains(&text.len()) || !text.chars().all(|char| char.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

fn resolve_meridiem(start: ClockTime, end: ClockTime) -> Option<(u16, u16)> {
    match (start.meridiem, end.meridiem) {
        (Some(_), Some(_)) | (None, None) => Some((start.minutes_of_day(), end.minutes_of_day())),
        (None, Some(meridiem)) => {
            if !start.is_twelve_hour() {
                return Some((start.minutes_of_day(), end.minutes_of_day()));
            }
            (start.dial_minutes() <= end.dial_minutes()).then(|| {
                (
                    start.with_meridiem(meridiem).minutes_of_day(),
                    end.minutes_of_day(),
                )
            })
        }
        (Some(meridiem), None) => {
            if !end.is_twelve_hour() {
                return Some((start.minutes_of_day(), end.minutes_of_day()));
            }
            (end.dial_minutes() >= start.dial_minutes()).then(|| {
                (
                    start.minutes_of_day(),
                    end.with_meridiem(meridiem).minutes_of_day(),
                )
            })
        }
    }
}

fn minutes_of(time: NaiveTime) -> u16 {
    (time.hour() * 60 + time.minute()) as u16
}

fn time_of(minutes: u16) -> NaiveTime {
    NaiveTime::from_hms_opt(u32::from(minutes / 60), u32::from(minutes % 60), 0)
        .unwrap_or(NaiveTime::MIN)
}
