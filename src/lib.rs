//! M3U playlist and XMLTV program guide ingestion.
//!
//! [`parse_m3u`] turns a playlist into [`Channel`]s. [`GuideParser`] turns an
//! XMLTV document into a [`GuideSnapshot`], and [`Guide::merge`] folds
//! snapshots from several sources into one guide keyed by channel id, which
//! joins to [`Channel::tvg_id`].
//!
//! Nothing here performs I/O; callers fetch and decompress documents and
//! hand over the text.

pub mod config;
pub mod epg;
pub mod error;
pub mod m3u_parser;

pub use config::{GuideConfig, GuideSource};
pub use epg::{
    parse_guide, parse_xmltv_time, Guide, GuideChannel, GuideParser, GuideSnapshot, MergeMode,
    MergeStats, NaiveTimePolicy, Programme, SharedGuide, TimestampParser,
};
pub use error::{ConfigError, FormatError};
pub use m3u_parser::{parse_m3u, Channel, M3uParser};
