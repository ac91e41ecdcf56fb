use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{SoraError, SoraResult};

/// Path segment appended to manifest URLs that do not already end in it.
pub const MANIFEST_PATH_SEGMENT: &str = "Manifest";

/// Immutable snapshot of a SmoothStreaming manifest. Replaced wholesale on
/// every successful refresh, never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Media duration. `None` for unbounded (live) presentations.
    pub duration: Option<Duration>,
    pub is_live: bool,
    pub stream_elements: Vec<StreamElement>,
    pub protection: Option<ProtectionElement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamElement {
    pub media_type: MediaType,
    pub formats: Vec<Format>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Audio,
    Video,
    Text,
    Other,
}

/// One bitrate/codec variant of a stream element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Format {
    pub id: String,
    pub bitrate: u32,
    #[serde(default)]
    pub codecs: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub language: Option<String>,
}

/// Manifest-embedded encryption metadata. `data` is the raw protection
/// header payload; see [`crate::protection::extract_key_id`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectionElement {
    #[serde(default)]
    pub system_id: Option<String>,
    pub data: Vec<u8>,
}

/// Shapes a user-supplied URL into the manifest document URL.
///
/// A last path segment equal to `manifest` (any case) means the URL already
/// points at the document; anything else gets [`MANIFEST_PATH_SEGMENT`]
/// appended.
pub fn normalize_manifest_url(url: &Url) -> SoraResult<Url> {
    let already_manifest = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .map(|last| last.eq_ignore_ascii_case("manifest"))
        .unwrap_or(false);
    if already_manifest {
        return Ok(url.clone());
    }

    let mut url = url.clone();
    url.path_segments_mut()
        .map_err(|_| SoraError::InvalidState("manifest URL cannot be a base"))?
        .pop_if_empty()
        .push(MANIFEST_PATH_SEGMENT);
    Ok(url)
}
