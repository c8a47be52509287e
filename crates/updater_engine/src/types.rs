use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::artifact::ContentHash;
use crate::bencode::ParseError;
use crate::host::HostError;
use crate::ItemId;

/// One file inside an artifact, path relative to the artifact root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub size: u64,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
        }
    }
}

/// Host-side status record of a tracked item.
///
/// `files` and `file_priorities` are index-aligned. `options` carries every
/// other field the host reports; the engine treats them as opaque apart from
/// the session-specific keys it strips during migration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ItemStatus {
    pub item_id: ItemId,
    pub name: String,
    pub source_reference: Option<String>,
    pub identity: ContentHash,
    pub files: Vec<FileEntry>,
    pub file_priorities: Vec<u8>,
    pub options: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchMetadata {
    pub original_url: String,
    pub final_url: String,
    pub status: u16,
    pub redirect_count: usize,
    pub content_type: Option<String>,
    /// Names of cookies the server set along the redirect chain.
    pub cookies_set: Vec<String>,
    pub byte_len: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutput {
    pub bytes: bytes::Bytes,
    pub metadata: FetchMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchError {
    pub(crate) fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    HttpStatus(u16),
    Timeout,
    RedirectLimitExceeded,
    TooLarge { max_bytes: u64, actual: Option<u64> },
    Network,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::RedirectLimitExceeded => write!(f, "redirect limit exceeded"),
            FailureKind::TooLarge { max_bytes, actual } => {
                write!(f, "response too large (max {max_bytes}, actual {actual:?})")
            }
            FailureKind::Network => write!(f, "network error"),
        }
    }
}

/// Why one item of a sweep could not be refreshed.
///
/// Every variant is isolated to its item; the sweep always moves on.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ItemFailure {
    #[error("Source reference is not a usable URL: {0}")]
    ReferenceMalformed(String),
    #[error("Unable to find site handler for {0}")]
    HandlerNotFound(String),
    #[error("Login to {site} failed: {detail}")]
    AuthFailure { site: String, detail: String },
    #[error("Error in site handling: {0}")]
    Transport(String),
    #[error("Downloaded file is not a valid torrent: {0}")]
    Parse(#[from] ParseError),
    #[error("Unable to replace current item with a new one: {0}")]
    CreateFailure(#[from] HostError),
}
