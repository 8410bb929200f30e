//! EPG (Electronic Program Guide) module
//!
//! XMLTV parsing, timestamp handling and merging of several guide sources.

mod merge;
mod parser;
mod time;

// Re-export public types
pub use merge::{Guide, MergeMode, MergeStats, SharedGuide};
pub use parser::{parse_guide, GuideChannel, GuideParser, GuideSnapshot, Programme};
pub use time::{parse_xmltv_time, NaiveTimePolicy, TimestampParser};

use chrono::{DateTime, Local, Utc};

/// Format an instant as local time HH:MM
pub fn format_time(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%H:%M").to_string()
}

/// Format an instant as local datetime YYYY-MM-DD HH:MM
pub fn format_datetime(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

/// `HH:MM - HH:MM` span shown next to a programme title
pub fn format_span(programme: &Programme) -> String {
    format!("{} - {}", format_time(programme.start), format_time(programme.stop))
}
