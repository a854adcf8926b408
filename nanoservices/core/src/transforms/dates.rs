//! Date parsing and formatting for the date functions.

use std::fmt::Write as _;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};

const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%d.%m.%Y %H:%M:%S",
];

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y"];

/// A parsed point in time, remembering how much of it was written down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Moment {
    Date(NaiveDate),
    Naive(NaiveDateTime),
    Zoned(DateTime<FixedOffset>),
}

impl Moment {
    pub(crate) fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Some(Moment::Zoned(dt));
        }
        if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
            return Some(Moment::Zoned(dt));
        }
        DATETIME_FORMATS
            .iter()
            .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
            .map(Moment::Naive)
            .or_else(|| {
                DATE_FORMATS
                    .iter()
                    .find_map(|f| NaiveDate::parse_from_str(text, f).ok())
                    .map(Moment::Date)
            })
    }

    /// Wall-clock time in the moment's own offset.
    fn local(&self) -> NaiveDateTime {
        match self {
            Moment::Date(d) => d.and_time(NaiveTime::MIN),
            Moment::Naive(dt) => *dt,
            Moment::Zoned(dt) => dt.naive_local(),
        }
    }

    /// Instant used for differences; zoned values are compared in UTC.
    fn instant(&self) -> NaiveDateTime {
        match self {
            Moment::Zoned(dt) => dt.naive_utc(),
            other => other.local(),
        }
    }

    pub(crate) fn year(&self) -> i64 {
        i64::from(self.local().year())
    }

    pub(crate) fn month(&self) -> i64 {
        i64::from(self.local().month())
    }

    pub(crate) fn day(&self) -> i64 {
        i64::from(self.local().day())
    }

    pub(crate) fn add_days(self, days: i64) -> Option<Self> {
        let delta = Duration::try_days(days)?;
        Some(match self {
            Moment::Date(d) => Moment::Date(d.checked_add_signed(delta)?),
            Moment::Naive(dt) => Moment::Naive(dt.checked_add_signed(delta)?),
            Moment::Zoned(dt) => Moment::Zoned(dt.checked_add_signed(delta)?),
        })
    }

    /// Canonical text for the moment's own precision.
    pub(crate) fn render(&self) -> String {
        match self {
            Moment::Date(d) => d.format("%Y-%m-%d").to_string(),
            Moment::Naive(dt) => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
            Moment::Zoned(dt) => dt.to_rfc3339(),
        }
    }

    /// Format with a strftime pattern; an unusable pattern (or an offset
    /// specifier on a value without one) is an error, never a panic.
    pub(crate) fn format(&self, strftime: &str) -> Result<String, String> {
        let items = parse_items(strftime)?;
        let mut out = String::new();
        let written = match self {
            Moment::Zoned(dt) => write!(out, "{}", dt.format_with_items(items.iter())),
            other => write!(out, "{}", other.local().format_with_items(items.iter())),
        };
        written.map_err(|_| format!("pattern '{strftime}' does not apply to this value"))?;
        Ok(out)
    }
}

/// Whole days from `a` to `b`, truncated toward zero.
pub(crate) fn days_between(a: &Moment, b: &Moment) -> i64 {
    (b.instant() - a.instant()).num_days()
}

fn parse_items(strftime: &str) -> Result<Vec<Item<'_>>, String> {
    let items: Vec<Item<'_>> = StrftimeItems::new(strftime).collect();
    if items.iter().any(|i| matches!(i, Item::Error)) {
        return Err(format!("'{strftime}' is not a valid date pattern"));
    }
    Ok(items)
}

/// Check a pattern without a value to format.
pub(crate) fn validate_pattern(pattern: &str) -> Result<(), String> {
    parse_items(&to_strftime(pattern)).map(|_| ())
}

/// Accept strftime as-is (anything containing `%`), otherwise translate
/// `yyyy-MM-dd HH:mm:ss` style tokens.
pub(crate) fn to_strftime(pattern: &str) -> String {
    if pattern.contains('%') {
        return pattern.to_string();
    }
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\'' || c == '"' {
            // quoted literal text
            i += 1;
            while i < chars.len() && chars[i] != c {
                out.push(chars[i]);
                i += 1;
            }
            i += 1;
            continue;
        }
        if c == '\\' && i + 1 < chars.len() {
            out.push(chars[i + 1]);
            i += 2;
            continue;
        }
        let run = chars[i..].iter().take_while(|&&x| x == c).count();
        let token = match (c, run) {
            ('y', 1) => "%-y",
            ('y', 2) => "%y",
            ('y', _) => "%Y",
            ('M', 1) => "%-m",
            ('M', 2) => "%m",
            ('M', 3) => "%b",
            ('M', _) => "%B",
            ('d', 1) => "%-d",
            ('d', 2) => "%d",
            ('d', 3) => "%a",
            ('d', _) => "%A",
            ('H', 1) => "%-H",
            ('H', _) => "%H",
            ('h', 1) => "%-I",
            ('h', _) => "%I",
            ('m', 1) => "%-M",
            ('m', _) => "%M",
            ('s', 1) => "%-S",
            ('s', _) => "%S",
            ('f' | 'F', 1..=3) => "%3f",
            ('f' | 'F', 4..=6) => "%6f",
            ('f' | 'F', _) => "%9f",
            ('t', _) => "%p",
            ('z', 1 | 2) => "%z",
            ('z', _) | ('K', _) => "%:z",
            _ => {
                out.extend(std::iter::repeat(c).take(run));
                i += run;
                continue;
            }
        };
        out.push_str(token);
        i += run;
    }
    out
}
