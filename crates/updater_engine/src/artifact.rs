//! Artifact identity, change detection and preference migration.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use sha1::{Digest, Sha1};

use crate::bencode::{self, Dict, ParseError, Value};
use crate::{FileEntry, ItemStatus};

/// Priority given to files the previous version did not have.
pub const DEFAULT_FILE_PRIORITY: u8 = 1;

/// Host status fields that only make sense for the session being replaced.
pub const SESSION_FIELDS: &[&str] = &[
    "comment", "hash", "peers", "progress", "num_seeds", "ratio", "total_peers", "total_wanted",
    "distributed_copies", "time_added", "active_time", "next_announce", "tracker",
    "tracker_host", "tracker_status", "trackers", "files", "file_priorities", "file_progress",
    "num_files", "is_seed", "seed_rank", "seeding_time", "download_payload_rate", "message",
    "num_peers", "compact", "total_uploaded", "total_done", "num_pieces",
    "total_payload_download", "total_seeds", "piece_length", "all_time_download", "name",
    "seeds_peers_ratio", "eta", "is_finished", "total_size", "state", "upload_payload_rate",
];

const STORAGE_FIELD: &str = "save_path";
const TARGET_STORAGE_FIELD: &str = "download_location";
const MAPPED_FILES_FIELD: &str = "mapped_files";

/// Lowercase hex digest identifying one artifact version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactIdentity {
    pub content_hash: ContentHash,
    pub name: String,
    pub files: Vec<FileEntry>,
}

/// Creation template for the replacement item.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PreferenceMigration {
    /// Aligned 1:1 with the new artifact's file list.
    pub file_priorities: Vec<u8>,
    pub options: Map<String, JsonValue>,
    /// Session-specific keys that were present on the old item and removed.
    pub dropped_fields: BTreeSet<String>,
}

/// Reads a `.torrent` container.
///
/// The identity is the info-hash: SHA-1 of the encoded `info` dictionary, the
/// same value a torrent host reports for the item. Tracker lists and comments
/// outside `info` do not change it.
pub fn extract_identity(bytes: &[u8]) -> Result<ArtifactIdentity, ParseError> {
    let root = bencode::decode(bytes)?;
    let root = root.as_dict().ok_or(ParseError::NotADictionary)?;
    let info = root
        .get(b"info")
        .ok_or(ParseError::MissingField("info"))?
        .as_dict()
        .ok_or(ParseError::InvalidField("info"))?;

    let name = text_field(info, b"name.utf-8", b"name")?.ok_or(ParseError::MissingField("name"))?;
    let files = match info.get(b"files") {
        Some(list) => {
            let list = list.as_list().ok_or(ParseError::InvalidField("files"))?;
            list.iter()
                .map(|entry| multi_file_entry(&name, entry))
                .collect::<Result<Vec<_>, _>>()?
        }
        None => {
            let size = length_field(info)?;
            vec![FileEntry::new(name.clone(), size)]
        }
    };

    Ok(ArtifactIdentity {
        content_hash: hash_hex(info.raw()),
        name,
        files,
    })
}

/// True iff the two hashes differ.
pub fn has_changed(old: &ContentHash, new: &ContentHash) -> bool {
    !old.as_str().eq_ignore_ascii_case(new.as_str())
}

/// Builds the creation template for the replacement of `old`.
///
/// Files present in both versions keep their old priority, new files get
/// [`DEFAULT_FILE_PRIORITY`]. Session-specific fields are dropped and the
/// storage location moves to the field name item creation expects.
pub fn migrate_preferences(old: &ItemStatus, new_files: &[FileEntry]) -> PreferenceMigration {
    let old_priorities: HashMap<&str, u8> = old
        .files
        .iter()
        .enumerate()
        .map(|(index, file)| {
            let priority = old
                .file_priorities
                .get(index)
                .copied()
                .unwrap_or(DEFAULT_FILE_PRIORITY);
            (file.path.as_str(), priority)
        })
        .collect();

    let file_priorities = new_files
        .iter()
        .map(|file| {
            old_priorities
                .get(file.path.as_str())
                .copied()
                .unwrap_or(DEFAULT_FILE_PRIORITY)
        })
        .collect();

    let mut options = old.options.clone();
    let mut dropped_fields = BTreeSet::new();
    for field in SESSION_FIELDS {
        if options.remove(*field).is_some() {
            dropped_fields.insert((*field).to_string());
        }
    }
    if let Some(location) = options.remove(STORAGE_FIELD) {
        options.insert(TARGET_STORAGE_FIELD.to_string(), location);
    }
    options.insert(
        MAPPED_FILES_FIELD.to_string(),
        JsonValue::Object(Map::new()),
    );

    PreferenceMigration {
        file_priorities,
        options,
        dropped_fields,
    }
}

fn multi_file_entry(root: &str, entry: &Value<'_>) -> Result<FileEntry, ParseError> {
    let entry = entry.as_dict().ok_or(ParseError::InvalidField("files"))?;
    let size = length_field(entry)?;
    let components = entry
        .get(b"path.utf-8")
        .or_else(|| entry.get(b"path"))
        .ok_or(ParseError::MissingField("path"))?
        .as_list()
        .ok_or(ParseError::InvalidField("path"))?;
    let mut path = root.to_string();
    for component in components {
        let component = component.as_bytes().ok_or(ParseError::InvalidField("path"))?;
        path.push('/');
        path.push_str(&String::from_utf8_lossy(component));
    }
    Ok(FileEntry::new(path, size))
}

fn length_field(dict: &Dict<'_>) -> Result<u64, ParseError> {
    let length = dict
        .get(b"length")
        .ok_or(ParseError::MissingField("length"))?
        .as_int()
        .ok_or(ParseError::InvalidField("length"))?;
    u64::try_from(length).map_err(|_| ParseError::InvalidField("length"))
}

fn text_field(
    dict: &Dict<'_>,
    preferred: &[u8],
    fallback: &[u8],
) -> Result<Option<String>, ParseError> {
    match dict.get(preferred).or_else(|| dict.get(fallback)) {
        Some(value) => {
            let bytes = value.as_bytes().ok_or(ParseError::InvalidField("name"))?;
            Ok(Some(String::from_utf8_lossy(bytes).into_owned()))
        }
        None => Ok(None),
    }
}

fn hash_hex(bytes: &[u8]) -> ContentHash {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    ContentHash(format!("{:x}", hasher.finalize()))
}
