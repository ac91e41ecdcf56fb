//! Session orchestration for adaptive SmoothStreaming media.
//!
//! ```text
//! ┌──────────────┐  manifest   ┌───────────────┐  catalog   ┌──────────────┐
//! │              ├─────────────►               ├────────────►              │
//! │   Manifest   │             │ SmoothSession │            │    Caller    │
//! │    loader    │  (refresh)  │               │ selections │              │
//! │              ◄─────────────┤ state machine ◄────────────┤              │
//! └──────────────┘             └───────┬───────┘            └──────────────┘
//!                                      │ create / carry over / release
//!                              ┌───────▼───────┐
//!                              │  ChunkStream  │ (one per selected group,
//!                              │   instances   │  external buffered readers)
//!                              └───────────────┘
//! ```
//!
//! The session itself never touches the network. Loads are issued by a
//! [`ManifestFetch`] implementation and their outcomes fed back in as
//! [`LoadEvent`]s; [`SessionDriver`] wires the two together on tokio.

pub mod catalog;
pub mod driver;
pub mod error;
pub mod loader;
pub mod manifest;
pub mod protection;
pub mod selection;
pub mod session;

use std::sync::Arc;

pub use crate::{
    catalog::{build_catalog, TrackGroup, TrackGroupCatalog},
    driver::SessionDriver,
    error::{SoraError, SoraResult},
    loader::{HttpManifestLoader, ManifestFetch, ManifestLoad, ManifestParser},
    manifest::{Manifest, MediaType, StreamElement},
    protection::{extract_key_id, ProtectionContext, ProtectionKey},
    selection::{ActiveStreamSet, StreamId, TrackSelection},
    session::{LoadDisposition, LoadEvent, SessionEvent, SessionState, SmoothSession},
};

/// Buffered progress reported by one track stream, or aggregated over all of
/// them. `EndOfSource` means the stream has no further limit to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourcePosition {
    Buffered(u64),
    EndOfSource,
}

/// How chunk quality is evaluated for one track stream. A selection of more
/// than one format switches the stream to adaptive evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationMode {
    Fixed,
    Adaptive,
}

/// Everything a [`ChunkStreamFactory`] needs to bind a fresh track stream:
/// the manifest snapshot, the originating stream element, the selected
/// formats, and the shared decryption context if the content is protected.
pub struct TrackStreamBinding<'a> {
    pub manifest: &'a Arc<Manifest>,
    pub element_index: usize,
    pub group: &'a TrackGroup,
    pub selected_formats: &'a [usize],
    pub evaluation: EvaluationMode,
    pub protection: Option<&'a ProtectionContext>,
    pub position: u64,
    /// Retry ceiling the stream should apply to its own chunk loads.
    pub min_load_retry_count: u32,
}

/// The per-track buffered read stream collaborator. Implementations queue
/// decoded media units, track their buffered position and perform seeks; the
/// session only fans operations out to them.
pub trait ChunkStream: Send {
    fn buffered_position(&self) -> SourcePosition;

    fn seek_to(&mut self, position: u64);

    /// Called on every live refresh so in-flight and future chunk selection
    /// use the updated metadata.
    fn update_manifest(&mut self, manifest: Arc<Manifest>);

    fn release(&mut self);
}

/// Creates [`ChunkStream`] instances for newly selected track groups. Byte
/// source and bandwidth evaluator construction live behind this seam.
pub trait ChunkStreamFactory: Send + Sync {
    fn create_stream(&self, binding: TrackStreamBinding<'_>) -> Box<dyn ChunkStream>;
}
