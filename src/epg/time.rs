//! XMLTV timestamp parsing: `YYYYMMDDHHMMSS [+-HHMM|Z]`
//!
//! The zone is normally separated by one space, but any amount of
//! whitespace, including none (`20231101100000+0200`), is accepted since
//! guide generators disagree on it. The zone itself is strict.

use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// How to read a timestamp that carries no zone suffix.
///
/// XMLTV leaves this unspecified. UTC is the default so results do not
/// depend on the machine the guide is parsed on; `Local` reproduces the
/// behaviour of players that read such times in the viewer's zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NaiveTimePolicy {
    #[default]
    Utc,
    Local,
}

/// Parses guide timestamps into UTC instants
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampParser {
    policy: NaiveTimePolicy,
}

impl TimestampParser {
    pub fn new(policy: NaiveTimePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> NaiveTimePolicy {
        self.policy
    }

    /// Parse a timestamp, returning `None` for anything malformed or for a
    /// date/time that does not exist on the calendar.
    pub fn parse(&self, text: &str) -> Option<DateTime<Utc>> {
        let text = text.trim();
        let digits = text.get(..14)?;
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let wall = wall_clock(digits)?;

        match text[14..].trim_start() {
            "" => self.resolve_naive(wall),
            "Z" | "z" => Some(Utc.from_utc_datetime(&wall)),
            zone => {
                let offset = parse_offset(zone)?;
                offset
                    .from_local_datetime(&wall)
                    .single()
                    .map(|dt| dt.with_timezone(&Utc))
            }
        }
    }

    fn resolve_naive(&self, wall: NaiveDateTime) -> Option<DateTime<Utc>> {
        match self.policy {
            NaiveTimePolicy::Utc => Some(Utc.from_utc_datetime(&wall)),
            // Skipped or repeated local times (DST transitions) are rejected
            NaiveTimePolicy::Local => Local
                .from_local_datetime(&wall)
                .single()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

/// Parse a timestamp with the default (UTC) policy for zone-less input
pub fn parse_xmltv_time(text: &str) -> Option<DateTime<Utc>> {
    TimestampParser::default().parse(text)
}

/// `digits` is exactly 14 ASCII digits
fn wall_clock(digits: &str) -> Option<NaiveDateTime> {
    let field = |range: std::ops::Range<usize>| digits[range].parse::<u32>().ok();

    let year = digits[0..4].parse::<i32>().ok()?;
    NaiveDate::from_ymd_opt(year, field(4..6)?, field(6..8)?)?.and_hms_opt(
        field(8..10)?,
        field(10..12)?,
        field(12..14)?,
    )
}

/// Zone offset like `+0100` or `-0530`
fn parse_offset(zone: &str) -> Option<FixedOffset> {
    let (sign, rest) = match zone.as_bytes().first()? {
        b'+' => (1, &zone[1..]),
        b'-' => (-1, &zone[1..]),
        _ => return None,
    };

    if rest.len() != 4 || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let hours: i32 = rest[0..2].parse().ok()?;
    let minutes: i32 = rest[2..4].parse().ok()?;
    if minutes >= 60 {
        return None;
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
