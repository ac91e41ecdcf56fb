use crate::manifest::{Format, Manifest, MediaType};

/// A named, ordered set of interchangeable format variants for one logical
/// track. Adaptive groups may switch between member formats during playback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackGroup {
    pub adaptive: bool,
    pub formats: Vec<Format>,
}

/// One catalog entry: a track group plus the index of the stream element it
/// was derived from. Keeping the pair in one structure means the mapping can
/// never drift out of sync with the group order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub group: TrackGroup,
    pub element_index: usize,
}

/// Ordered track groups derived from a manifest, in manifest order. Built
/// once on first manifest arrival; the catalog shape is assumed stable
/// across live refreshes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackGroupCatalog {
    entries: Vec<CatalogEntry>,
}

impl TrackGroupCatalog {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, group: usize) -> Option<&CatalogEntry> {
        self.entries.get(group)
    }

    pub fn element_index(&self, group: usize) -> Option<usize> {
        self.entries.get(group).map(|entry| entry.element_index)
    }

    pub fn groups(&self) -> impl Iterator<Item = &TrackGroup> {
        self.entries.iter().map(|entry| &entry.group)
    }
}

/// Derives the selectable track groups from a manifest.
///
/// Stream elements qualify only with at least one format and a recognized
/// media type; only video groups are bitrate-adaptive. Pure and
/// deterministic: the same manifest always yields the same catalog.
pub fn build_catalog(manifest: &Manifest) -> TrackGroupCatalog {
    let mut entries = Vec::with_capacity(manifest.stream_elements.len());
    for (element_index, element) in manifest.stream_elements.iter().enumerate() {
        if element.formats.is_empty() {
            continue;
        }
        let adaptive = match element.media_type {
            MediaType::Video => true,
            MediaType::Audio | MediaType::Text => false,
            MediaType::Other => continue,
        };
        entries.push(CatalogEntry {
            group: TrackGroup {
                adaptive,
                formats: element.formats.clone(),
            },
            element_index,
        });
    }
    TrackGroupCatalog { entries }
}
