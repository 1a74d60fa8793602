//! Publication time resolution.
//!
//! Detail pages carry a `<time>` element with either a machine-readable
//! `datetime` attribute or a relative French phrase ("il y a 3 jours").

use std::sync::LazyLock;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeDelta};
use regex::Regex;
use scraper::{Html, Selector};

use crate::text::normalize;

/// Output format for resolved timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

static TIME_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("time").expect("time selector"));

static FIRST_INT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("integer regex"));

/// Offset-free layouts tried after RFC 3339.
const NAIVE_LAYOUTS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Outcome of resolving a page's publication time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicationTime {
    /// The page has no `<time>` element.
    Absent,
    /// A `YYYY-MM-DD HH:MM:SS` timestamp.
    Resolved(String),
    /// The normalized, lower-cased text that could not be interpreted.
    Unresolved(String),
}

impl PublicationTime {
    /// The value stored on the record.
    pub fn into_value(self) -> String {
        match self {
            Self::Absent => String::new(),
            Self::Resolved(s) | Self::Unresolved(s) => s,
        }
    }
}

/// Resolve the publication time relative to the local clock.
pub fn resolve_publication_time_now(document: &Html) -> String {
    resolve_publication_time(document, Local::now().naive_local())
}

/// Resolve the first `<time>` element of `document` to `YYYY-MM-DD HH:MM:SS`.
///
/// Returns the empty string when there is no `<time>` element, and the
/// normalized text when neither the attribute nor the phrase can be read.
pub fn resolve_publication_time(document: &Html, now: NaiveDateTime) -> String {
    resolve(document, now).into_value()
}

/// Like [`resolve_publication_time`] but keeps track of how the value was obtained.
pub fn resolve(document: &Html, now: NaiveDateTime) -> PublicationTime {
    let Some(time) = document.select(&TIME_SEL).next() else {
        return PublicationTime::Absent;
    };

    if let Some(parsed) = time.value().attr("datetime").and_then(parse_iso) {
        return PublicationTime::Resolved(parsed.format(TIMESTAMP_FORMAT).to_string());
    }

    let text = normalize(time.text().collect::<String>().as_str()).to_lowercase();
    match relative_to(&text, now) {
        Some(dt) => PublicationTime::Resolved(dt.format(TIMESTAMP_FORMAT).to_string()),
        None if text.is_empty() => PublicationTime::Absent,
        None => PublicationTime::Unresolved(text),
    }
}

/// Parse an ISO-8601 value, keeping the wall-clock time as written.
fn parse_iso(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    if let Some(dt) = NAIVE_LAYOUTS
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(raw, layout).ok())
    {
        return Some(dt);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Interpret phrases like "il y a 5 heures". Unit keywords are checked in a
/// fixed order and `an` is a plain substring test.
fn relative_to(text: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let n: i64 = match FIRST_INT_RE.find(text) {
        Some(m) => m.as_str().parse().ok()?,
        None => 1,
    };

    let delta = if text.contains("minute") {
        TimeDelta::try_minutes(n)?
    } else if text.contains("heure") {
        TimeDelta::try_hours(n)?
    } else if text.contains("jour") {
        TimeDelta::try_days(n)?
    } else if text.contains("mois") {
        TimeDelta::try_days(n.checked_mul(30)?)?
    } else if text.contains("an") {
        TimeDelta::try_days(n.checked_mul(365)?)?
    } else {
        return None;
    };

    now.checked_sub_signed(delta)
}
