use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Kind of captured media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn mime_type(self) -> &'static str {
        match self {
            MediaKind::Image => "image/jpeg",
            MediaKind::Video => "video/mp4",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            MediaKind::Image => "jpg",
            MediaKind::Video => "mp4",
        }
    }

    /// File name prefix used in the managed storage areas
    pub fn file_prefix(self) -> &'static str {
        match self {
            MediaKind::Image => "stump",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// A validated media file owned by the local store.
///
/// Only `LocalMediaStore` creates these, after the file at `storage_uri` was
/// stat'ed with a non-zero size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAsset {
    pub id: Uuid,
    pub kind: MediaKind,
    pub source_uri: PathBuf,
    pub mime_type: String,
    pub display_name: String,
    pub size_bytes: u64,
    pub storage_uri: PathBuf,
}

/// A decoded result image written to the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedResult {
    pub storage_uri: PathBuf,
    pub received_at: DateTime<Utc>,
}
