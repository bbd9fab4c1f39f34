//! Represents one stored object interpreted as a candidate image.

use chrono::{DateTime, Utc};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};

use crate::services::gateway::RawObject;

/// Metadata key under which the alt-text description is stored.
pub const META_DESCRIPTION: &str = "description";

/// Metadata key under which the comma-joined tag list is stored.
pub const META_TAGS: &str = "tags";

/// Extensions accepted as displayable images.
const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];

/// Characters left untouched when building the URL-safe `path`.
/// Matches the unreserved set, everything else is percent-encoded.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Classifies a raw storage entry.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
    Other,
}

/// Tag input as it arrives from a caller: either a raw delimited string or
/// an already-split list. Both normalize through the same rules.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TagsInput {
    Raw(String),
    List(Vec<String>),
}

impl TagsInput {
    /// Normalize into the canonical tag list. Raw strings are split on
    /// newline, carriage return, comma, and pipe; each tag is trimmed,
    /// lowercased, and empty tags are dropped. Lists are used as-is.
    pub fn into_tags(self) -> Vec<String> {
        match self {
            TagsInput::Raw(raw) => parse_tags(&raw),
            TagsInput::List(tags) => tags,
        }
    }
}

/// Per-request projection of one stored blob's identity and image-relevant
/// metadata. Constructed fresh on every read from the gateway; the remote
/// store is the sole source of truth.
#[derive(Serialize, Clone, Debug)]
pub struct Image {
    /// Full storage key. Unique identifier, immutable once created.
    pub key: String,

    /// Key with the extension (and any directory prefix) stripped.
    pub name: String,

    /// Lowercase file extension parsed from the key. Empty when absent.
    pub extension: String,

    /// Provider-reported modification time, used for ordering.
    pub last_modified: DateTime<Utc>,

    /// Classification of the storage entry.
    pub kind: EntryKind,

    /// URL-safe path built from `name` + `extension`. Present only when
    /// both are known; always derived, never set independently.
    pub path: Option<String>,

    /// Free-text alt-text metadata.
    pub description: Option<String>,

    /// Ordered lowercase tags. Always a split sequence after construction.
    pub tags: Vec<String>,
}

impl Image {
    /// Build an `Image` from a raw gateway entry.
    ///
    /// This is the single normalization path shared by the listing and the
    /// single-fetch flows; the two provider response shapes must never grow
    /// separate reconciliation logic.
    pub fn from_raw(raw: &RawObject) -> Self {
        let (name, extension) = split_key(&raw.key);

        let mut image = Self {
            key: raw.key.clone(),
            name,
            extension,
            last_modified: raw.last_modified,
            kind: raw.kind,
            path: None,
            description: raw.metadata.get(META_DESCRIPTION).cloned(),
            tags: raw
                .metadata
                .get(META_TAGS)
                .map(|joined| parse_tags(joined))
                .unwrap_or_default(),
        };
        image.path = image.derive_path();
        image
    }

    /// Reassemble an object key from a name and extension.
    pub fn object_key(name: &str, extension: &str) -> String {
        format!("{}.{}", name, extension)
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    /// A record qualifies as displayable iff it is a file and its extension
    /// is in the allowed image set.
    pub fn is_image(&self) -> bool {
        self.is_file() && IMAGE_EXTENSIONS.contains(&self.extension.as_str())
    }

    fn derive_path(&self) -> Option<String> {
        if self.name.is_empty() || self.extension.is_empty() {
            return None;
        }
        Some(format!(
            "/{}/{}",
            utf8_percent_encode(&self.name, PATH_SEGMENT),
            self.extension
        ))
    }
}

/// Split a key into `(name, lowercase extension)`.
///
/// The name is the basename without its final extension; keys without a dot
/// yield an empty extension.
fn split_key(key: &str) -> (String, String) {
    let basename = key.rsplit('/').next().unwrap_or(key);
    match basename.rsplit_once('.') {
        Some((stem, ext)) if !ext.is_empty() => (stem.to_string(), ext.to_lowercase()),
        _ => (basename.to_string(), String::new()),
    }
}

/// Normalize a raw delimited tag string: split on newline, carriage return,
/// comma, or pipe, trim whitespace, lowercase, and drop empties.
pub fn parse_tags(input: &str) -> Vec<String> {
    input
        .split(['\n', '\r', ',', '|'])
        .map(|tag| tag.trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .collect()
}
