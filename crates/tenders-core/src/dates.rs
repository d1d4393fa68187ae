//! Heuristic parsing of the date strings procurement portals publish.
//!
//! Upstream text mixes day-first and month-first orderings, ordinal suffixes,
//! `hrs`/`AM` time noise and placeholder filler such as "Various dates". The
//! parser never fails: anything it cannot resolve is `None`, which callers read
//! as "schedule unknown".
//!
//! Zone policy: text that carries an explicit offset keeps it; naive text is
//! interpreted as East Africa Time.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use regex::Regex;
use tracing::debug;

pub const EAT_OFFSET_SECS: i32 = 3 * 3600;

/// Tokens that mark filler text rather than a date.
pub const PLACEHOLDER_TOKENS: [&str; 5] = ["various", "multiple", "closing", "date", "www"];

/// Tried in order; the first pattern that matches wins.
pub const DATE_PATTERNS: [&str; 8] = [
    "%d %B %Y", // 15 March 2024
    "%B %d %Y", // March 15 2024
    "%d/%m/%Y", // 15/03/2024
    "%Y-%m-%d", // 2024-03-15
    "%d-%m-%Y", // 15-03-2024
    "%d.%m.%Y", // 15.03.2024
    "%d %b %Y", // 15 Mar 2024
    "%b %d %Y", // Mar 15 2024
];

/// Two-digit years, read as 20xx. Only tried once the four-digit patterns fail.
const SHORT_YEAR_PATTERNS: [&str; 3] = ["%d/%m/%y", "%d-%m-%y", "%d.%m.%y"];

/// chrono's `%Y` also accepts one to three digits; anything earlier is a misread short year.
const MIN_YEAR: i32 = 1000;

const ZONED_PATTERNS: [&str; 3] = [
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

const NAIVE_PATTERNS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

static MERIDIEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d|\b)(?:a\.m\.|p\.m\.|am\b|pm\b)").expect("meridiem regex"));
static POST_MERIDIEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:\d|\b)(?:p\.m\.|pm\b)").expect("pm regex"));
static ANTE_MERIDIEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:\d|\b)(?:a\.m\.|am\b)").expect("am regex"));
static WEEKDAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:monday|tuesday|wednesday|thursday|friday|saturday|sunday|mon|tues|tue|wed|thurs|thur|thu|fri|sat|sun)\b\.?",
    )
    .expect("weekday regex")
});
static HOURS_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)hrs\.?").expect("hrs regex"));
static ORDINAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d)(?:st|nd|rd|th)\b").expect("ordinal regex"));
static TIME_OF_DAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})[:.](\d{2})(?:[:.](\d{2}))?\b").expect("time-of-day regex")
});
static TRAILING_HOUR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?)\s+(\d{1,4})$").expect("trailing hour regex"));
static AT_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bat\b").expect("at regex"));

/// East Africa Time, the civil zone every derived field is computed in.
pub fn eat() -> FixedOffset {
    FixedOffset::east_opt(EAT_OFFSET_SECS).expect("UTC+3 is a valid offset")
}

/// Parse an upstream date string. Returns `None` for filler or unparsable text.
pub fn parse_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || is_placeholder(trimmed) {
        return None;
    }

    let meridiem = Meridiem::detect(trimmed);
    let cleaned = strip_noise(trimmed);
    if cleaned.is_empty() {
        return None;
    }

    if let Some(date) = parse_explicit(&cleaned) {
        return localize_naive(date.and_time(NaiveTime::MIN));
    }

    let parsed =
        parse_flexible(&cleaned, meridiem).or_else(|| parse_flexible(trimmed, Meridiem::Unspecified));
    if parsed.is_none() {
        debug!(raw, "could not parse date");
    }
    parsed
}

pub fn is_placeholder(text: &str) -> bool {
    let lower = text.to_lowercase();
    PLACEHOLDER_TOKENS.iter().any(|token| lower.contains(token))
}

/// Remove a leading weekday, time suffixes, ordinals and commas; collapse whitespace.
pub fn strip_noise(text: &str) -> String {
    let text = WEEKDAY.replace(text.trim_start(), " ");
    let text = HOURS_SUFFIX.replace_all(&text, " ");
    let text = MERIDIEM.replace_all(&text, "$1 ");
    let text = ORDINAL.replace_all(&text, "$1");
    let text = text.replace(',', " ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Attach EAT to a timestamp that carries no zone.
pub fn localize_naive(naive: NaiveDateTime) -> Option<DateTime<FixedOffset>> {
    eat().from_local_datetime(&naive).single()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Meridiem {
    Ante,
    Post,
    Unspecified,
}

impl Meridiem {
    fn detect(text: &str) -> Self {
        if POST_MERIDIEM.is_match(text) {
            Meridiem::Post
        } else if ANTE_MERIDIEM.is_match(text) {
            Meridiem::Ante
        } else {
            Meridiem::Unspecified
        }
    }

    /// 12-hour clock to 24-hour: `12 AM` is midnight, `1 PM` is 13.
    fn to_24h(self, hour: u32) -> u32 {
        match self {
            Meridiem::Post if hour < 12 => hour + 12,
            Meridiem::Ante if hour == 12 => 0,
            _ => hour,
        }
    }
}

fn parse_explicit(text: &str) -> Option<NaiveDate> {
    DATE_PATTERNS.iter().find_map(|pattern| {
        NaiveDate::parse_from_str(text, pattern)
            .ok()
            .filter(|date| date.year() >= MIN_YEAR)
    })
}

/// Explicit patterns, then the two-digit-year variants.
fn parse_calendar_date(text: &str) -> Option<NaiveDate> {
    parse_explicit(text).or_else(|| {
        SHORT_YEAR_PATTERNS
            .iter()
            .find_map(|pattern| NaiveDate::parse_from_str(text, pattern).ok())
    })
}

fn parse_flexible(text: &str, meridiem: Meridiem) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt);
    }
    if let Some(dt) = ZONED_PATTERNS
        .iter()
        .find_map(|pattern| DateTime::parse_from_str(text, pattern).ok())
    {
        return Some(dt);
    }
    if let Some(naive) = NAIVE_PATTERNS.iter().find_map(|pattern| {
        NaiveDateTime::parse_from_str(text, pattern)
            .ok()
            .filter(|naive| naive.year() >= MIN_YEAR)
    }) {
        return localize_naive(naive);
    }
    if let Some(date) = parse_calendar_date(text) {
        return localize_naive(date.and_time(NaiveTime::MIN));
    }
    parse_with_time_of_day(text, meridiem).or_else(|| parse_with_trailing_hour(text, meridiem))
}

/// "15 March 2024 10:00" and "10.00 at 15/03/2024": split the clock time out,
/// parse the remainder as a calendar date, then recombine. Every clock-shaped
/// token is tried since `15.03` in `15.03.2024` looks like one too.
fn parse_with_time_of_day(text: &str, meridiem: Meridiem) -> Option<DateTime<FixedOffset>> {
    TIME_OF_DAY.captures_iter(text).find_map(|caps| {
        let whole = caps.get(0)?;
        let hour: u32 = caps.get(1)?.as_str().parse().ok()?;
        let minute: u32 = caps.get(2)?.as_str().parse().ok()?;
        let second: u32 = match caps.get(3) {
            Some(m) => m.as_str().parse().ok()?,
            None => 0,
        };
        let remainder = format!("{} {}", &text[..whole.start()], &text[whole.end()..]);
        combine_date_and_time(&remainder, meridiem.to_24h(hour), minute, second)
    })
}

/// "3 June 2024 10" or "15 March 2024 1000": the bare hour (or HHMM) left
/// behind once an `AM`/`hrs` suffix is stripped.
fn parse_with_trailing_hour(text: &str, meridiem: Meridiem) -> Option<DateTime<FixedOffset>> {
    let caps = TRAILING_HOUR.captures(text)?;
    let token = caps.get(2)?.as_str();
    let value: u32 = token.parse().ok()?;
    let (hour, minute) = if token.len() <= 2 {
        (value, 0)
    } else {
        (value / 100, value % 100)
    };
    combine_date_and_time(caps.get(1)?.as_str(), meridiem.to_24h(hour), minute, 0)
}

fn combine_date_and_time(
    date_text: &str,
    hour: u32,
    minute: u32,
    second: u32,
) -> Option<DateTime<FixedOffset>> {
    let time = NaiveTime::from_hms_opt(hour, minute, second)?;
    let date_text = AT_WORD.replace_all(date_text, " ");
    let date_text = date_text.split_whitespace().collect::<Vec<_>>().join(" ");
    let date = parse_calendar_date(&date_text)?;
    localize_naive(date.and_time(time))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    fn ymd(dt: DateTime<FixedOffset>) -> (i32, u32, u32) {
        (dt.year(), dt.month(), dt.day())
    }

    #[test]
    fn every_supported_format_resolves_to_same_day() {
        for raw in [
            "15 March 2024",
            "March 15 2024",
            "March 15, 2024",
            "15/03/2024",
            "2024-03-15",
            "15-03-2024",
            "15.03.2024",
            "15 Mar 2024",
            "Mar 15 2024",
            "15th March, 2024",
        ] {
            let parsed = parse_date(raw).unwrap_or_else(|| panic!("failed to parse {raw}"));
            assert_eq!(ymd(parsed), (2024, 3, 15), "{raw}");
            assert_eq!(parsed.offset(), &eat(), "{raw}");
        }
    }

    #[test]
    fn placeholders_never_parse() {
        for raw in [
            "Various",
            "Multiple dates",
            "See closing notice",
            "www.mygov.go.ke",
            "Closing Date: 15 March 2024",
            "",
            "   ",
        ] {
            assert_eq!(parse_date(raw), None, "{raw}");
        }
    }

    #[test]
    fn time_noise_is_stripped() {
        let parsed = parse_date("1st April 2024 at 10:00hrs").expect("hrs suffix");
        assert_eq!(ymd(parsed), (2024, 4, 1));
        assert_eq!(parsed.hour(), 10);

        let parsed = parse_date("15/03/2024 10:00 A.M.").expect("clock time with meridiem");
        assert_eq!(ymd(parsed), (2024, 3, 15));
        assert_eq!(parsed.hour(), 10);

        let parsed = parse_date("15 March 2024 at 2:30 PM").expect("afternoon time");
        assert_eq!((parsed.hour(), parsed.minute()), (14, 30));
    }

    #[test]
    fn explicit_offsets_are_kept() {
        let parsed = parse_date("2024-03-15T09:00:00Z").expect("rfc3339");
        assert_eq!(parsed.offset().local_minus_utc(), 0);
        assert_eq!(parsed.hour(), 9);

        let parsed = parse_date("2024-03-15T09:00:00+03:00").expect("rfc3339 with offset");
        assert_eq!(parsed.offset(), &eat());
    }

    #[test]
    fn naive_iso_timestamps_are_read_as_eat() {
        let parsed = parse_date("2024-03-15 17:30:00").expect("naive iso");
        assert_eq!(parsed.offset(), &eat());
        assert_eq!((parsed.hour(), parsed.minute()), (17, 30));
    }

    #[test]
    fn pattern_order_breaks_ties_day_first() {
        // Both %d/%m and a month-first reading are conceivable; day-first wins.
        let parsed = parse_date("04/05/2024").expect("numeric date");
        assert_eq!(ymd(parsed), (2024, 5, 4));
    }

    #[test]
    fn two_digit_years_land_in_this_century() {
        for raw in ["15/03/24", "15-03-24", "15.03.24", "15/03/24 10:00"] {
            let parsed = parse_date(raw).unwrap_or_else(|| panic!("failed to parse {raw}"));
            assert_eq!(ymd(parsed), (2024, 3, 15), "{raw}");
        }
    }

    #[test]
    fn leading_weekday_is_ignored() {
        let parsed = parse_date("Friday, 15th March 2024").expect("weekday prefix");
        assert_eq!(ymd(parsed), (2024, 3, 15));

        let parsed = parse_date("Tuesday 2nd April 2024 11:00 am").expect("weekday and clock");
        assert_eq!(ymd(parsed), (2024, 4, 2));
        assert_eq!((parsed.hour(), parsed.minute()), (11, 0));

        let parsed = parse_date("Wed. 20/03/2024").expect("abbreviated weekday");
        assert_eq!(ymd(parsed), (2024, 3, 20));
    }

    #[test]
    fn dotted_clock_times_are_understood() {
        let parsed = parse_date("15th March 2024 at 10.00 a.m.").expect("dotted clock");
        assert_eq!(ymd(parsed), (2024, 3, 15));
        assert_eq!(parsed.hour(), 10);

        let parsed = parse_date("15.03.2024 10.30").expect("dotted date and clock");
        assert_eq!(ymd(parsed), (2024, 3, 15));
        assert_eq!((parsed.hour(), parsed.minute()), (10, 30));
    }

    #[test]
    fn bare_hour_left_after_suffix_is_a_time() {
        let parsed = parse_date("3rd June 2024 10AM").expect("bare hour");
        assert_eq!(ymd(parsed), (2024, 6, 3));
        assert_eq!(parsed.hour(), 10);

        let parsed = parse_date("15 March 2024 1000hrs").expect("military hour");
        assert_eq!(ymd(parsed), (2024, 3, 15));
        assert_eq!((parsed.hour(), parsed.minute()), (10, 0));

        let parsed = parse_date("15 March 2024 2PM").expect("afternoon bare hour");
        assert_eq!(parsed.hour(), 14);
    }

    #[test]
    fn twelve_am_is_midnight() {
        let parsed = parse_date("15/03/2024 12:30 AM").expect("after midnight");
        assert_eq!((parsed.hour(), parsed.minute()), (0, 30));

        let parsed = parse_date("15/03/2024 12:30 PM").expect("after noon");
        assert_eq!((parsed.hour(), parsed.minute()), (12, 30));
    }

    #[test]
    fn garbage_returns_none() {
        assert_eq!(parse_date("to be announced"), None);
        assert_eq!(parse_date("32/13/2024"), None);
    }

    #[test]
    fn strip_noise_collapses_whitespace() {
        assert_eq!(strip_noise("  3rd  June,  2024  10AM "), "3 June 2024 10");
        assert_eq!(strip_noise("12 HRS"), "12");
    }
}
