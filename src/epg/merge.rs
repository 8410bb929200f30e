//! Cumulative guide built from one or more parsed guide sources

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

use super::parser::{GuideChannel, GuideSnapshot, Programme};
use crate::m3u_parser::Channel;

/// How a snapshot is combined with the guide built so far
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    /// Discard everything and take the snapshot as-is
    Replace,
    /// Keep existing channel metadata, add programmes from the snapshot
    Accumulate,
}

impl fmt::Display for MergeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeMode::Replace => f.write_str("replace"),
            MergeMode::Accumulate => f.write_str("accumulate"),
        }
    }
}

/// What a single merge changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub source: String,
    pub mode: MergeMode,
    pub channels_added: usize,
    /// Channel ids already present; their metadata was left untouched
    pub channels_kept: usize,
    pub programmes_added: usize,
    pub total_channels: usize,
    pub total_programmes: usize,
}

/// Merged program guide.
///
/// Programme lists are kept sorted by start time after every merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Guide {
    pub channels: HashMap<String, GuideChannel>,
    pub programmes: HashMap<String, Vec<Programme>>,
}

impl Guide {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one parsed source into the guide.
    ///
    /// Replace mode is equivalent to `Guide::from(snapshot)`. In accumulate
    /// mode the first source to define a channel id keeps it; programmes for
    /// the same id are appended and re-sorted by start with a stable sort.
    /// Programmes are never de-duplicated, so overlapping sources both
    /// contribute.
    pub fn merge(&mut self, snapshot: GuideSnapshot, source: &str, mode: MergeMode) -> MergeStats {
        let incoming_channels = snapshot.channels.len();
        let programmes_added = snapshot.programme_count();

        let channels_added = match mode {
            MergeMode::Replace => {
                *self = Guide::from(snapshot);
                incoming_channels
            }
            MergeMode::Accumulate => {
                let mut added = 0;
                for (id, channel) in snapshot.channels {
                    if let Entry::Vacant(slot) = self.channels.entry(id) {
                        slot.insert(channel);
                        added += 1;
                    }
                }

                for (id, programmes) in snapshot.programmes {
                    let list = self.programmes.entry(id).or_default();
                    list.extend(programmes);
                    list.sort_by_key(|p| p.start);
                }
                added
            }
        };

        let stats = MergeStats {
            source: source.to_string(),
            mode,
            channels_added,
            channels_kept: incoming_channels - channels_added,
            programmes_added,
            total_channels: self.channel_count(),
            total_programmes: self.programme_count(),
        };

        info!(
            source = %stats.source,
            mode = %stats.mode,
            channels_added = stats.channels_added,
            channels_kept = stats.channels_kept,
            programmes_added = stats.programmes_added,
            "guide total after merge: {} channels, {} programmes",
            stats.total_channels,
            stats.total_programmes
        );

        stats
    }

    pub fn channel(&self, id: &str) -> Option<&GuideChannel> {
        self.channels.get(id)
    }

    /// Programmes for a channel, sorted by start
    pub fn programmes(&self, id: &str) -> &[Programme] {
        self.programmes.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Guide metadata for a playlist channel, joined on `tvg-id`
    pub fn channel_for(&self, channel: &Channel) -> Option<&GuideChannel> {
        self.channel(channel.tvg_id.as_deref()?)
    }

    pub fn programmes_for(&self, channel: &Channel) -> &[Programme] {
        channel
            .tvg_id
            .as_deref()
            .map(|id| self.programmes(id))
            .unwrap_or_default()
    }

    /// Programme airing at `at`
    pub fn current_programme(&self, id: &str, at: DateTime<Utc>) -> Option<&Programme> {
        self.programmes(id).iter().find(|p| p.is_airing(at))
    }

    /// First programme starting after `at`
    pub fn next_programme(&self, id: &str, at: DateTime<Utc>) -> Option<&Programme> {
        self.programmes(id).iter().find(|p| p.start > at)
    }

    /// Programmes overlapping `[from, to)`
    pub fn programmes_in_range(
        &self,
        id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<&Programme> {
        self.programmes(id)
            .iter()
            .filter(|p| p.stop > from && p.start < to)
            .collect()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Total number of programmes
    pub fn programme_count(&self) -> usize {
        self.programmes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty() && self.programmes.is_empty()
    }

    pub fn clear(&mut self) {
        self.channels.clear();
        self.programmes.clear();
    }
}

impl From<GuideSnapshot> for Guide {
    /// Take a snapshot's contents, with each programme list sorted by start
    fn from(snapshot: GuideSnapshot) -> Self {
        let mut programmes = snapshot.programmes;
        for list in programmes.values_mut() {
            list.sort_by_key(|p| p.start);
        }
        Self {
            channels: snapshot.channels,
            programmes,
        }
    }
}

/// Guide shared between threads.
///
/// Readers get an immutable `Arc<Guide>` that is always a complete state.
/// Merges are serialized; each runs on a private copy that is published
/// once finished.
#[derive(Default)]
pub struct SharedGuide {
    current: ArcSwap<Guide>,
    write_lock: Mutex<()>,
}

impl SharedGuide {
    pub fn new(guide: Guide) -> Self {
        Self {
            current: ArcSwap::from_pointee(guide),
            write_lock: Mutex::new(()),
        }
    }

    /// Current guide
    pub fn snapshot(&self) -> Arc<Guide> {
        self.current.load_full()
    }

    pub fn merge(&self, snapshot: GuideSnapshot, source: &str, mode: MergeMode) -> MergeStats {
        let _guard = self.write_lock.lock();

        let mut next = match mode {
            MergeMode::Replace => Guide::new(),
            MergeMode::Accumulate => Guide::clone(&self.current.load()),
        };
        let stats = next.merge(snapshot, source, mode);
        self.current.store(Arc::new(next));
        stats
    }

    pub fn clear(&self) {
        let _guard = self.write_lock.lock();
        self.current.store(Arc::new(Guide::new()));
    }
}

impl fmt::Debug for SharedGuide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guide = self.current.load();
        f.debug_struct("SharedGuide")
            .field("channels", &guide.channel_count())
            .field("programmes", &guide.programme_count())
            .finish()
    }
}
