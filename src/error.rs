//! Error types for playlist and guide parsing

use thiserror::Error;

/// Document-level parse failure.
///
/// Individual malformed entries never produce one of these; they are
/// dropped and logged instead. A `FormatError` means the whole document
/// was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// Playlist did not start with the `#EXTM3U` header line
    #[error("invalid M3U playlist: missing or incorrect #EXTM3U header")]
    MissingHeader,

    /// Guide document is not well-formed XML
    #[error("failed to parse XML at byte {position}: {message}")]
    MalformedXml { position: u64, message: String },
}

impl FormatError {
    pub(crate) fn malformed_xml(position: u64, message: impl Into<String>) -> Self {
        FormatError::MalformedXml {
            position,
            message: message.into(),
        }
    }

    pub fn is_missing_header(&self) -> bool {
        matches!(self, FormatError::MissingHeader)
    }

    pub fn is_malformed_xml(&self) -> bool {
        matches!(self, FormatError::MalformedXml { .. })
    }
}

/// Configuration loading failure
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
