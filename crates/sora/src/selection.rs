use std::sync::Arc;

use crate::{
    catalog::{TrackGroup, TrackGroupCatalog},
    error::{SoraError, SoraResult},
    manifest::Manifest,
    protection::ProtectionContext,
    ChunkStream, ChunkStreamFactory, EvaluationMode, SourcePosition, TrackStreamBinding,
};

/// Identity of one active track stream, stable for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

/// Caller request to activate one track group with one or more of its format
/// indices. More than one format implies adaptive switching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackSelection {
    pub group: usize,
    pub formats: Vec<usize>,
}

/// A [`TrackSelection`] validated against the catalog, carrying the resolved
/// stream-element index and group metadata.
#[derive(Debug, Clone)]
pub struct ResolvedSelection {
    pub group: usize,
    pub element_index: usize,
    pub group_info: TrackGroup,
    pub formats: Vec<usize>,
}

/// Validates selections against the catalog without touching any state.
/// An out-of-bounds group index rejects the whole call.
pub fn resolve_selections(
    catalog: &TrackGroupCatalog,
    selections: &[TrackSelection],
) -> SoraResult<Vec<ResolvedSelection>> {
    let mut resolved = Vec::with_capacity(selections.len());
    for selection in selections {
        let entry = catalog
            .get(selection.group)
            .ok_or(SoraError::InvalidSelection {
                group: selection.group,
                groups: catalog.len(),
            })?;
        resolved.push(ResolvedSelection {
            group: selection.group,
            element_index: entry.element_index,
            group_info: entry.group.clone(),
            formats: selection.formats.clone(),
        });
    }
    Ok(resolved)
}

/// One entity per currently selected track group, wrapping the external
/// buffered-stream collaborator bound to it.
pub struct ActiveTrackStream {
    id: StreamId,
    group: usize,
    element_index: usize,
    formats: Vec<usize>,
    stream: Box<dyn ChunkStream>,
}

impl ActiveTrackStream {
    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn group(&self) -> usize {
        self.group
    }

    pub fn element_index(&self) -> usize {
        self.element_index
    }

    pub fn formats(&self) -> &[usize] {
        &self.formats
    }

    fn release(mut self) {
        self.stream.release();
    }
}

/// The full set of active track streams. Always a consistent reflection of
/// the most recent selection call; replaced wholesale, never edited in place.
#[derive(Default)]
pub struct ActiveStreamSet {
    streams: Vec<ActiveTrackStream>,
}

impl ActiveStreamSet {
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn ids(&self) -> Vec<StreamId> {
        self.streams.iter().map(|s| s.id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActiveTrackStream> {
        self.streams.iter()
    }

    /// Minimum of all finite per-stream buffered positions. Streams with no
    /// limit to report are excluded; with none left the source is exhausted.
    pub fn buffered_position(&self) -> SourcePosition {
        let mut min: Option<u64> = None;
        for stream in &self.streams {
            if let SourcePosition::Buffered(position) = stream.stream.buffered_position() {
                min = Some(min.map_or(position, |m| m.min(position)));
            }
        }
        match min {
            Some(position) => SourcePosition::Buffered(position),
            None => SourcePosition::EndOfSource,
        }
    }

    /// Broadcasts the seek target to every stream. Fire-and-forget per
    /// stream; the requested position is returned as-is.
    pub fn seek_to(&mut self, position: u64) -> u64 {
        for stream in &mut self.streams {
            stream.stream.seek_to(position);
        }
        position
    }

    pub(crate) fn update_manifest(&mut self, manifest: &Arc<Manifest>) {
        for stream in &mut self.streams {
            stream.stream.update_manifest(Arc::clone(manifest));
        }
    }

    pub(crate) fn release_all(self) {
        for stream in self.streams {
            stream.release();
        }
    }
}

/// Shared context for building the next stream generation.
pub struct SelectionContext<'a> {
    pub manifest: &'a Arc<Manifest>,
    pub protection: Option<&'a ProtectionContext>,
    pub factory: &'a dyn ChunkStreamFactory,
    pub min_load_retry_count: u32,
}

/// Builds the next stream generation from the previous one plus a diff.
///
/// Streams named in `removals` are released exactly once; the rest carry
/// over by identity, preserving their relative order and buffering state.
/// One fresh stream is created per addition, appended after the carryovers
/// and started at `position`. The returned ids match the addition order.
/// Additions must already be validated via [`resolve_selections`].
pub fn next_generation(
    previous: ActiveStreamSet,
    removals: &[StreamId],
    additions: &[ResolvedSelection],
    position: u64,
    next_id: &mut u64,
    ctx: &SelectionContext<'_>,
) -> (ActiveStreamSet, Vec<StreamId>) {
    let mut streams = Vec::with_capacity(previous.streams.len() + additions.len());
    for stream in previous.streams {
        if removals.contains(&stream.id) {
            stream.release();
        } else {
            streams.push(stream);
        }
    }

    let mut created = Vec::with_capacity(additions.len());
    for selection in additions {
        let evaluation = if selection.formats.len() > 1 {
            EvaluationMode::Adaptive
        } else {
            EvaluationMode::Fixed
        };
        let stream = ctx.factory.create_stream(TrackStreamBinding {
            manifest: ctx.manifest,
            element_index: selection.element_index,
            group: &selection.group_info,
            selected_formats: &selection.formats,
            evaluation,
            protection: ctx.protection,
            position,
            min_load_retry_count: ctx.min_load_retry_count,
        });

        let id = StreamId(*next_id);
        *next_id += 1;
        created.push(id);
        streams.push(ActiveTrackStream {
            id,
            group: selection.group,
            element_index: selection.element_index,
            formats: selection.formats.clone(),
            stream,
        });
    }

    (ActiveStreamSet { streams }, created)
}
