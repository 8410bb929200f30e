//! M3U playlist parser
//!
//! Line-oriented: an `#EXTINF:` directive opens a pending entry, the next
//! non-comment line supplies its URL and completes the channel.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::FormatError;

/// Required first line of every playlist
pub const HEADER: &str = "#EXTM3U";

/// Prefix of the per-channel directive line
pub const EXTINF: &str = "#EXTINF:";

/// Duration reported for live / unbounded streams
pub const LIVE_DURATION: i64 = -1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// Title after the first comma; `None` when the directive had no comma
    pub name: Option<String>,
    pub url: String,
    /// Seconds, `-1` for live
    pub duration: i64,
    pub tvg_id: Option<String>,
    pub tvg_name: Option<String>,        // Alternate name for EPG matching
    pub tvg_logo: Option<String>,
    pub group_title: Option<String>,
}

impl Channel {
    pub fn is_live(&self) -> bool {
        self.duration < 0
    }
}

/// Parsed `#EXTINF` line still waiting for its URL
#[derive(Debug, Clone, Default, PartialEq)]
struct ExtInf {
    name: Option<String>,
    duration: i64,
    tvg_id: Option<String>,
    tvg_name: Option<String>,
    tvg_logo: Option<String>,
    group_title: Option<String>,
}

impl ExtInf {
    fn into_channel(self, url: &str) -> Channel {
        Channel {
            name: self.name,
            url: url.to_string(),
            duration: self.duration,
            tvg_id: self.tvg_id,
            tvg_name: self.tvg_name,
            tvg_logo: self.tvg_logo,
            group_title: self.group_title,
        }
    }
}

/// Stateless playlist parser.
///
/// Kept as a type so callers can hold a parser next to [`crate::GuideParser`];
/// nothing is carried between calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct M3uParser;

impl M3uParser {
    pub fn parse(&self, content: &str) -> Result<Vec<Channel>, FormatError> {
        parse_m3u(content)
    }
}

/// Parse M3U content into channels, in document order.
///
/// Fails only when the first non-blank line is not exactly `#EXTM3U`.
/// Orphaned directives and URLs without a directive are dropped.
pub fn parse_m3u(content: &str) -> Result<Vec<Channel>, FormatError> {
    let mut lines = content.lines().map(str::trim).filter(|line| !line.is_empty());

    if lines.next() != Some(HEADER) {
        return Err(FormatError::MissingHeader);
    }

    let (pending, channels) = lines.fold(
        (None::<ExtInf>, Vec::new()),
        |(pending, mut channels), line| {
            if let Some(info) = line.strip_prefix(EXTINF) {
                if let Some(orphan) = pending {
                    debug!(name = ?orphan.name, "dropping #EXTINF entry without URL");
                }
                (Some(parse_extinf(info)), channels)
            } else if line.starts_with('#') {
                // Other directives and comments
                (pending, channels)
            } else {
                match pending {
                    Some(entry) => channels.push(entry.into_channel(line)),
                    None => debug!(url = line, "ignoring URL without preceding #EXTINF"),
                }
                (None, channels)
            }
        },
    );

    if let Some(orphan) = pending {
        debug!(name = ?orphan.name, "dropping #EXTINF entry at end of playlist");
    }

    Ok(channels)
}

/// Parse the part of an `#EXTINF:` line after the marker
fn parse_extinf(info: &str) -> ExtInf {
    let info = info.trim();

    let (meta, name) = match info.split_once(',') {
        Some((meta, title)) => (meta, Some(title.trim().to_string())),
        None => (info, None),
    };

    let mut tokens = meta.split_whitespace();
    let duration = tokens.next().map_or(LIVE_DURATION, parse_duration);
    let attrs = tokens.collect::<Vec<_>>().join(" ");

    let mut entry = ExtInf {
        name,
        duration,
        ..ExtInf::default()
    };

    for (key, value) in Attributes::new(&attrs) {
        let slot = if key.eq_ignore_ascii_case("tvg-id") {
            &mut entry.tvg_id
        } else if key.eq_ignore_ascii_case("tvg-name") {
            &mut entry.tvg_name
        } else if key.eq_ignore_ascii_case("tvg-logo") {
            &mut entry.tvg_logo
        } else if key.eq_ignore_ascii_case("group-title") {
            &mut entry.group_title
        } else {
            continue;
        };
        *slot = Some(value.trim().to_string());
    }

    entry
}

/// Duration token: fractional values are truncated, anything unparsable is live
fn parse_duration(token: &str) -> i64 {
    match token.parse::<f64>() {
        Ok(secs) if secs.is_finite() => secs.trunc() as i64,
        _ => LIVE_DURATION,
    }
}

/// Iterator over `key=value` / `key="value"` pairs.
///
/// Keys are runs of ASCII letters, digits and `-`. A quoted value runs to the
/// next `"` with no escape handling; an unquoted value stops at whitespace
/// or a comma. Text that does not fit the pattern is skipped.
struct Attributes<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Attributes<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn is_key_byte(b: u8) -> bool {
        b.is_ascii_alphanumeric() || b == b'-'
    }

    /// Value starting at `start`, returning it and the index just past it
    fn value_at(&self, start: usize) -> Option<(&'a str, usize)> {
        let bytes = self.input.as_bytes();

        if bytes.get(start) == Some(&b'"') {
            if let Some(len) = self.input[start + 1..].find('"') {
                let end = start + 1 + len;
                return Some((&self.input[start + 1..end], end + 1));
            }
            // Unterminated quote falls through to the unquoted form
        }

        let end = bytes[start..]
            .iter()
            .position(|&b| b.is_ascii_whitespace() || b == b',')
            .map_or(bytes.len(), |len| start + len);

        (end > start).then(|| (&self.input[start..end], end))
    }
}

impl<'a> Iterator for Attributes<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        let bytes = self.input.as_bytes();

        while self.pos < bytes.len() {
            if !Self::is_key_byte(bytes[self.pos]) {
                self.pos += 1;
                continue;
            }

            let key_start = self.pos;
            let key_end = bytes[key_start..]
                .iter()
                .position(|&b| !Self::is_key_byte(b))
                .map_or(bytes.len(), |len| key_start + len);

            if bytes.get(key_end) == Some(&b'=') {
                if let Some((value, next)) = self.value_at(key_end + 1) {
                    self.pos = next;
                    return Some((&self.input[key_start..key_end], value));
                }
            }

            self.pos = key_end + 1;
        }

        None
    }
}

#[cfg(test)]
#[path = "m3u_parser_tests.rs"]
mod tests;
