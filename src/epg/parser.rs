//! XMLTV program guide parser
//!
//! Streaming parser over quick-xml events. Only the first `display-name` and
//! `icon` of a channel and the first `title` and `desc` of a programme are
//! used; later repeats are ignored.
//!
//! Internal entities declared in the document's `<!DOCTYPE>` subset are
//! expanded. External entities are never fetched, so a reference to one is
//! treated like any other undefined entity and fails the document.

use chrono::{DateTime, Utc};
use quick_xml::escape::{resolve_predefined_entity, unescape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::BufRead;
use tracing::{debug, warn};

use super::time::{NaiveTimePolicy, TimestampParser};
use crate::error::FormatError;

/// Channel information from the guide
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuideChannel {
    /// Channel ID (matches `tvg-id` in playlists)
    pub id: String,
    pub display_name: String,
    /// Icon URL, empty when the guide has none
    pub icon: String,
}

/// A single scheduled airing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Programme {
    /// May reference a channel the guide never declares
    pub channel_id: String,
    pub start: DateTime<Utc>,
    /// Not checked against `start`
    pub stop: DateTime<Utc>,
    pub title: String,
    pub description: String,
}

impl Programme {
    /// Whether `at` falls in `[start, stop)`
    pub fn is_airing(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && self.stop > at
    }
}

/// Result of parsing one guide document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuideSnapshot {
    /// Channel information indexed by channel ID
    pub channels: HashMap<String, GuideChannel>,
    /// Programmes indexed by channel ID, in document order
    pub programmes: HashMap<String, Vec<Programme>>,
}

impl GuideSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn programme_count(&self) -> usize {
        self.programmes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty() && self.programmes.is_empty()
    }
}

/// Child element whose text is being collected
#[derive(Debug, Clone, Copy, PartialEq)]
enum Field {
    DisplayName,
    Title,
    Desc,
}

#[derive(Debug)]
struct Capture {
    field: Field,
    depth: usize,
    text: String,
}

#[derive(Debug, Default)]
struct PendingChannel {
    id: Option<String>,
    display_name: Option<String>,
    icon: Option<String>,
}

#[derive(Debug, Default)]
struct PendingProgramme {
    channel: Option<String>,
    start: Option<String>,
    stop: Option<String>,
    title: Option<String>,
    desc: Option<String>,
}

#[derive(Debug)]
enum Item {
    Channel(PendingChannel),
    Programme(PendingProgramme),
}

/// Accumulates one snapshot while events stream past
struct SnapshotBuilder {
    timestamps: TimestampParser,
    snapshot: GuideSnapshot,
    /// Open `channel`/`programme` element and the depth it was opened at
    item: Option<(usize, Item)>,
    capture: Option<Capture>,
    /// Entities declared in the DOCTYPE internal subset
    entities: HashMap<String, String>,
    skipped: usize,
}

impl SnapshotBuilder {
    fn new(timestamps: TimestampParser) -> Self {
        Self {
            timestamps,
            snapshot: GuideSnapshot::new(),
            item: None,
            capture: None,
            entities: HashMap::new(),
            skipped: 0,
        }
    }

    fn open(&mut self, e: &BytesStart, depth: usize, position: u64) -> Result<(), FormatError> {
        let name = e.name();

        match (&mut self.item, name.as_ref()) {
            (None, b"channel") => {
                let channel = PendingChannel {
                    id: attribute(e, b"id", &self.entities, position)?,
                    ..PendingChannel::default()
                };
                self.item = Some((depth, Item::Channel(channel)));
            }
            (None, b"programme") => {
                let programme = PendingProgramme {
                    channel: attribute(e, b"channel", &self.entities, position)?,
                    start: attribute(e, b"start", &self.entities, position)?,
                    stop: attribute(e, b"stop", &self.entities, position)?,
                    ..PendingProgramme::default()
                };
                self.item = Some((depth, Item::Programme(programme)));
            }
            (Some((_, Item::Channel(channel))), b"display-name")
                if channel.display_name.is_none() && self.capture.is_none() =>
            {
                self.capture = Some(Capture::new(Field::DisplayName, depth));
            }
            (Some((_, Item::Channel(channel))), b"icon") if channel.icon.is_none() => {
                channel.icon = Some(attribute(e, b"src", &self.entities, position)?.unwrap_or_default());
            }
            (Some((_, Item::Programme(programme))), b"title")
                if programme.title.is_none() && self.capture.is_none() =>
            {
                self.capture = Some(Capture::new(Field::Title, depth));
            }
            (Some((_, Item::Programme(programme))), b"desc")
                if programme.desc.is_none() && self.capture.is_none() =>
            {
                self.capture = Some(Capture::new(Field::Desc, depth));
            }
            _ => {}
        }

        Ok(())
    }

    fn text(&mut self, text: &str) {
        if let Some(capture) = self.capture.as_mut() {
            capture.text.push_str(text);
        }
    }

    fn close(&mut self, depth: usize) {
        if self.capture.as_ref().is_some_and(|c| c.depth == depth) {
            if let (Some(capture), Some((_, item))) = (self.capture.take(), self.item.as_mut()) {
                let value = Some(capture.text.trim().to_string());
                match (capture.field, item) {
                    (Field::DisplayName, Item::Channel(channel)) => channel.display_name = value,
                    (Field::Title, Item::Programme(programme)) => programme.title = value,
                    (Field::Desc, Item::Programme(programme)) => programme.desc = value,
                    _ => {}
                }
            }
        }

        if self.item.as_ref().is_some_and(|(d, _)| *d == depth) {
            match self.item.take() {
                Some((_, Item::Channel(channel))) => self.finish_channel(channel),
                Some((_, Item::Programme(programme))) => self.finish_programme(programme),
                None => {}
            }
        }
    }

    fn finish_channel(&mut self, channel: PendingChannel) {
        let Some(id) = channel.id.filter(|id| !id.is_empty()) else {
            debug!("skipping channel without id");
            self.skipped += 1;
            return;
        };

        self.snapshot.channels.insert(
            id.clone(),
            GuideChannel {
                id,
                display_name: channel.display_name.unwrap_or_default(),
                icon: channel.icon.unwrap_or_default(),
            },
        );
    }

    fn finish_programme(&mut self, programme: PendingProgramme) {
        let present = |value: Option<String>| value.filter(|v| !v.is_empty());

        let (Some(channel_id), Some(start_raw), Some(stop_raw)) = (
            present(programme.channel),
            present(programme.start),
            present(programme.stop),
        ) else {
            debug!(title = ?programme.title, "skipping programme with missing channel/start/stop");
            self.skipped += 1;
            return;
        };

        let title = programme.title.unwrap_or_default();
        let (Some(start), Some(stop)) = (
            self.timestamps.parse(&start_raw),
            self.timestamps.parse(&stop_raw),
        ) else {
            warn!(
                channel = %channel_id,
                title = %title,
                start = %start_raw,
                stop = %stop_raw,
                "could not parse programme times"
            );
            self.skipped += 1;
            return;
        };

        self.snapshot
            .programmes
            .entry(channel_id.clone())
            .or_default()
            .push(Programme {
                channel_id,
                start,
                stop,
                title,
                description: programme.desc.unwrap_or_default(),
            });
    }
}

impl Capture {
    fn new(field: Field, depth: usize) -> Self {
        Self {
            field,
            depth,
            text: String::new(),
        }
    }
}

/// XMLTV parser; the only setting is how zone-less timestamps are read
#[derive(Debug, Clone, Copy, Default)]
pub struct GuideParser {
    timestamps: TimestampParser,
}

impl GuideParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: NaiveTimePolicy) -> Self {
        Self {
            timestamps: TimestampParser::new(policy),
        }
    }

    /// Parse a guide held in memory
    pub fn parse(&self, xml: &str) -> Result<GuideSnapshot, FormatError> {
        self.parse_reader(xml.as_bytes())
    }

    /// Parse a guide from a reader.
    ///
    /// Fails if the document is not well-formed. A document whose root is
    /// not `<tv>` is accepted and yields an empty snapshot.
    pub fn parse_reader<R: BufRead>(&self, reader: R) -> Result<GuideSnapshot, FormatError> {
        let mut xml_reader = Reader::from_reader(reader);
        xml_reader.config_mut().check_end_names = true;

        let mut buf = Vec::with_capacity(8192);
        let mut builder = SnapshotBuilder::new(self.timestamps);
        let mut depth = 0usize;
        let mut root_seen = false;
        let mut collect = false;

        loop {
            buf.clear();
            let position = xml_reader.buffer_position() as u64;
            let event = xml_reader
                .read_event_into(&mut buf)
                .map_err(|e| FormatError::malformed_xml(position, e.to_string()))?;

            match event {
                Event::Start(ref e) | Event::Empty(ref e) => {
                    if depth == 0 {
                        if root_seen {
                            return Err(FormatError::malformed_xml(
                                position,
                                "content after the root element",
                            ));
                        }
                        root_seen = true;
                        collect = e.name().as_ref() == b"tv";
                        if !collect {
                            warn!(
                                root = %String::from_utf8_lossy(e.name().as_ref()),
                                "no <tv> root element; not a valid XMLTV document"
                            );
                        }
                    }

                    check_attributes(e, &builder.entities, position)?;

                    let is_empty = matches!(event, Event::Empty(_));
                    if collect {
                        builder.open(e, depth, position)?;
                        if is_empty {
                            builder.close(depth);
                        }
                    }
                    if !is_empty {
                        depth += 1;
                    }
                }
                Event::End(_) => {
                    depth = depth.checked_sub(1).ok_or_else(|| {
                        FormatError::malformed_xml(position, "unmatched closing tag")
                    })?;
                    if collect {
                        builder.close(depth);
                    }
                }
                Event::Text(ref e) => {
                    let text = e
                        .unescape_with(|name| resolve_entity(&builder.entities, name))
                        .map_err(|err| FormatError::malformed_xml(position, err.to_string()))?;
                    if depth == 0 {
                        if !text.trim().is_empty() {
                            return Err(FormatError::malformed_xml(
                                position,
                                "text outside the root element",
                            ));
                        }
                    } else if collect {
                        builder.text(&text);
                    }
                }
                Event::CData(ref e) => {
                    if depth == 0 {
                        return Err(FormatError::malformed_xml(
                            position,
                            "CDATA outside the root element",
                        ));
                    }
                    if collect {
                        builder.text(&String::from_utf8_lossy(e));
                    }
                }
                Event::DocType(ref e) => {
                    builder.entities = declared_entities(&String::from_utf8_lossy(e));
                }
                Event::Eof => break,
                _ => {}
            }
        }

        let position = xml_reader.buffer_position() as u64;
        if !root_seen {
            return Err(FormatError::malformed_xml(position, "no root element"));
        }
        if depth > 0 {
            return Err(FormatError::malformed_xml(
                position,
                format!("{} unclosed element(s) at end of document", depth),
            ));
        }

        let snapshot = builder.snapshot;
        debug!(
            channels = snapshot.channels.len(),
            programmes = snapshot.programme_count(),
            skipped = builder.skipped,
            "parsed guide document"
        );

        Ok(snapshot)
    }
}

/// Parse a guide with zone-less timestamps read as UTC
pub fn parse_guide(xml: &str) -> Result<GuideSnapshot, FormatError> {
    GuideParser::new().parse(xml)
}

/// Unescaped attribute value; a malformed attribute list fails the document
fn attribute(
    e: &BytesStart,
    name: &[u8],
    entities: &HashMap<String, String>,
    position: u64,
) -> Result<Option<String>, FormatError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| FormatError::malformed_xml(position, err.to_string()))?;
        if attr.key.as_ref() == name {
            let value = attr
                .unescape_value_with(|entity| resolve_entity(entities, entity))
                .map_err(|err| FormatError::malformed_xml(position, err.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

/// Attributes of every element must be well-formed, read or not
fn check_attributes(
    e: &BytesStart,
    entities: &HashMap<String, String>,
    position: u64,
) -> Result<(), FormatError> {
    for attr in e.attributes() {
        attr.map_err(|err| FormatError::malformed_xml(position, err.to_string()))?
            .unescape_value_with(|entity| resolve_entity(entities, entity))
            .map_err(|err| FormatError::malformed_xml(position, err.to_string()))?;
    }
    Ok(())
}

fn resolve_entity<'a>(entities: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    match resolve_predefined_entity(name) {
        Some(value) => Some(value),
        None => entities.get(name).map(String::as_str),
    }
}

/// Internal general entities from a DOCTYPE body such as
/// `tv [<!ENTITY co "Acme &amp; Co">]`. The first declaration of a name
/// binds; parameter and external entities are skipped.
fn declared_entities(doctype: &str) -> HashMap<String, String> {
    const DECL: &str = "<!ENTITY";

    let mut entities = HashMap::new();
    let mut rest = doctype;

    while let Some(start) = rest.find(DECL) {
        rest = rest[start + DECL.len()..].trim_start();
        if rest.starts_with('%') {
            continue;
        }

        let name_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let (name, tail) = rest.split_at(name_end);
        let tail = tail.trim_start();

        let quote = match tail.chars().next() {
            Some(q @ ('"' | '\'')) => q,
            // SYSTEM or PUBLIC
            _ => continue,
        };
        let Some(len) = tail[1..].find(quote) else {
            break;
        };

        let raw = &tail[1..1 + len];
        let value = unescape(raw).map(|v| v.into_owned()).unwrap_or_else(|_| raw.to_string());
        entities.entry(name.to_string()).or_insert(value);
        rest = &tail[len + 2..];
    }

    debug!(count = entities.len(), "entities declared in DOCTYPE");
    entities
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_parse_simple_epg() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE tv SYSTEM "xmltv.dtd">
<tv generator-info-name="test">
  <channel id="bbc1">
    <display-name>BBC One</display-name>
    <display-name>BBC 1</display-name>
    <icon src="http://example.com/bbc1.png"/>
  </channel>
  <programme start="20231026100000 +0200" stop="20231026110000 +0200" channel="bbc1">
    <title>News at Noon</title>
    <title lang="de">Nachrichten</title>
    <desc>Daily news broadcast</desc>
    <category>News</category>
  </programme>
</tv>"#;

        let epg = parse_guide(xml).unwrap();

        assert_eq!(epg.channels.len(), 1);
        let channel = &epg.channels["bbc1"];
        assert_eq!(channel.display_name, "BBC One");
        assert_eq!(channel.icon, "http://example.com/bbc1.png");

        let programmes = &epg.programmes["bbc1"];
        assert_eq!(programmes.len(), 1);
        assert_eq!(programmes[0].title, "News at Noon");
        assert_eq!(programmes[0].description, "Daily news broadcast");
        assert_eq!(programmes[0].start, utc(2023, 10, 26, 8, 0));
        assert_eq!(programmes[0].stop, utc(2023, 10, 26, 9, 0));
    }

    #[test]
    fn test_channel_missing_info_defaults() {
        let xml = r#"
            <tv>
                <channel id="ch2"></channel>
                <channel id="ch3">
                    <display-name>Channel 3 Only Name</display-name>
                </channel>
                <channel id="ch4">
                    <icon src="icon4.png"/>
                </channel>
                <channel id="ch5"/>
                <channel><display-name>No Id</display-name></channel>
                <channel id=""><display-name>Empty Id</display-name></channel>
            </tv>"#;

        let epg = parse_guide(xml).unwrap();
        assert_eq!(epg.channels.len(), 4);
        assert_eq!(epg.channels["ch2"].display_name, "");
        assert_eq!(epg.channels["ch2"].icon, "");
        assert_eq!(epg.channels["ch3"].display_name, "Channel 3 Only Name");
        assert_eq!(epg.channels["ch3"].icon, "");
        assert_eq!(epg.channels["ch4"].display_name, "");
        assert_eq!(epg.channels["ch4"].icon, "icon4.png");
        assert_eq!(epg.channels["ch5"].id, "ch5");
    }

    #[test]
    fn test_first_icon_wins_even_without_src() {
        let xml = r#"<tv><channel id="c"><icon/><icon src="late.png"/></channel></tv>"#;
        let epg = parse_guide(xml).unwrap();
        assert_eq!(epg.channels["c"].icon, "");
    }

    #[test]
    fn test_programme_missing_attributes_skipped() {
        let xml = r#"
            <tv>
                <channel id="ch1"><display-name>C1</display-name></channel>
                <programme channel="ch1" start="20231026100000 +0000">
                    <title>Prog 1</title>
                </programme>
                <programme channel="ch1" stop="20231026120000 +0000">
                    <title>Prog 2</title>
                </programme>
                <programme start="20231026120000 +0000" stop="20231026130000 +0000">
                    <title>Prog 3</title>
                </programme>
                <programme channel="ch1" start="bad" stop="20231026130000 +0000">
                    <title>Prog 4</title>
                </programme>
                <programme channel="ch1" start="20231026130000 +0000" stop="20231026140000 +0000">
                    <title>Valid</title>
                </programme>
            </tv>"#;

        let epg = parse_guide(xml).unwrap();
        let programmes = &epg.programmes["ch1"];
        assert_eq!(programmes.len(), 1);
        assert_eq!(programmes[0].title, "Valid");
        assert_eq!(epg.programme_count(), 1);
    }

    #[test]
    fn test_programmes_keep_document_order() {
        let xml = r#"<tv>
  <programme start="20240115130000 +0000" stop="20240115140000 +0000" channel="ch1"><title>Later</title></programme>
  <programme start="20240115120000 +0000" stop="20240115130000 +0000" channel="ch1"><title>Earlier</title></programme>
  <programme start="20240115120000 +0000" stop="20240115130000 +0000" channel="ch2"/>
</tv>"#;

        let epg = parse_guide(xml).unwrap();
        let titles: Vec<_> = epg.programmes["ch1"].iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, ["Later", "Earlier"]);
        // Undeclared channel ids are kept
        assert!(epg.channels.is_empty());
        assert_eq!(epg.programmes["ch2"][0].title, "");
        assert_eq!(epg.programme_count(), 3);
    }

    #[test]
    fn test_stop_before_start_is_kept() {
        let xml = r#"<tv><programme channel="c" start="20240115130000 +0000" stop="20240115120000 +0000"/></tv>"#;
        let epg = parse_guide(xml).unwrap();
        assert_eq!(epg.programmes["c"].len(), 1);
    }

    #[test]
    fn test_text_is_trimmed_and_unescaped() {
        let xml = r#"<tv>
  <channel id="c&amp;1"><display-name>  Tom &amp; Jerry &#x263A; </display-name></channel>
  <programme channel="c&amp;1" start="20240115120000 +0000" stop="20240115130000 +0000">
    <title><![CDATA[Fish & Chips]]></title>
    <desc>
      Line one
    </desc>
  </programme>
</tv>"#;

        let epg = parse_guide(xml).unwrap();
        assert_eq!(epg.channels["c&1"].display_name, "Tom & Jerry \u{263A}");
        let programme = &epg.programmes["c&1"][0];
        assert_eq!(programme.title, "Fish & Chips");
        assert_eq!(programme.description, "Line one");
    }

    #[test]
    fn test_nested_markup_contributes_text() {
        let xml = r#"<tv><programme channel="c" start="20240115120000" stop="20240115130000"><desc>Part <b>bold</b> end</desc></programme></tv>"#;
        let epg = parse_guide(xml).unwrap();
        assert_eq!(epg.programmes["c"][0].description, "Part bold end");
    }

    #[test]
    fn test_naive_times_follow_policy() {
        let xml = r#"<tv><programme channel="c" start="20240115120000" stop="20240115130000"/></tv>"#;
        let epg = GuideParser::with_policy(NaiveTimePolicy::Utc).parse(xml).unwrap();
        assert_eq!(epg.programmes["c"][0].start, utc(2024, 1, 15, 12, 0));
    }

    #[test]
    fn test_non_tv_root_yields_empty_snapshot() {
        let xml = r#"<channel id="ch1"><display-name>Channel 1</display-name></channel>"#;
        let epg = parse_guide(xml).unwrap();
        assert!(epg.channels.is_empty());
        assert!(epg.programmes.is_empty());
        assert!(epg.is_empty());
    }

    #[test]
    fn test_empty_document_is_malformed() {
        let err = parse_guide("").unwrap_err();
        assert!(err.is_malformed_xml());
        assert!(err.to_string().starts_with("failed to parse XML"));

        assert!(parse_guide("  \n ").unwrap_err().is_malformed_xml());
    }

    #[test]
    fn test_mismatched_tag_is_malformed() {
        let xml = r#"<tv><channel id="ch1"><display-name>Channel 1</unclosed></channel></tv>"#;
        assert!(parse_guide(xml).unwrap_err().is_malformed_xml());
    }

    #[test]
    fn test_unclosed_root_is_malformed() {
        let xml = r#"<tv><channel id="ch1"><display-name>Channel 1</display-name></channel>"#;
        assert!(parse_guide(xml).unwrap_err().is_malformed_xml());
    }

    #[test]
    fn test_content_after_root_is_malformed() {
        assert!(parse_guide("<tv></tv><tv></tv>").unwrap_err().is_malformed_xml());
        assert!(parse_guide("<tv></tv>trailing").unwrap_err().is_malformed_xml());
    }

    #[test]
    fn test_undefined_entity_is_malformed() {
        let xml = r#"<tv><channel id="c"><display-name>A&nbsp;B</display-name></channel></tv>"#;
        assert!(parse_guide(xml).unwrap_err().is_malformed_xml());
    }

    #[test]
    fn test_doctype_entities_are_expanded() {
        let xml = r#"<?xml version="1.0"?>
<!DOCTYPE tv [
  <!ENTITY foo "bar">
  <!ENTITY co 'Acme &amp; Co'>
  <!ENTITY foo "ignored">
  <!ENTITY ext SYSTEM "http://example.com/ext.txt">
]>
<tv>
  <channel id="&foo;"><display-name>&foo; by &co;</display-name></channel>
</tv>"#;

        let epg = parse_guide(xml).unwrap();
        assert_eq!(epg.channels["bar"].display_name, "bar by Acme & Co");
    }

    #[test]
    fn test_external_entity_is_not_resolved() {
        let xml = r#"<!DOCTYPE tv [<!ENTITY ext SYSTEM "file:///etc/passwd">]><tv><channel id="c"><display-name>&ext;</display-name></channel></tv>"#;
        assert!(parse_guide(xml).unwrap_err().is_malformed_xml());
    }

    #[test]
    fn test_malformed_attribute_on_ignored_element() {
        let xml = r#"<tv><programme channel="c" start="20240115120000" stop="20240115130000"><title lang=de>Nachrichten</title></programme></tv>"#;
        assert!(parse_guide(xml).unwrap_err().is_malformed_xml());

        let xml = r#"<tv><category x="&nope;"/></tv>"#;
        assert!(parse_guide(xml).unwrap_err().is_malformed_xml());
    }

    #[test]
    fn test_parse_reader() {
        let xml = br#"<tv><channel id="r"><display-name>Reader</display-name></channel></tv>"#;
        let epg = GuideParser::new()
            .parse_reader(std::io::BufReader::new(&xml[..]))
            .unwrap();
        assert_eq!(epg.channels["r"].display_name, "Reader");
    }
}
