use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::mpsc;

use crate::{
    build_catalog,
    catalog::TrackGroupCatalog,
    error::{SoraError, SoraResult},
    manifest::Manifest,
    protection::{extract_key_id, ProtectionContext},
    selection::{next_generation, resolve_selections, ActiveStreamSet, SelectionContext},
    ChunkStreamFactory, SourcePosition, StreamId, TrackSelection,
};

/// The default minimum number of times to retry loading the manifest prior
/// to failing.
pub const DEFAULT_MIN_LOAD_RETRY_COUNT: u32 = 3;

/// A live manifest is never re-fetched earlier than this, measured from the
/// start of the previous load.
pub const MINIMUM_MANIFEST_REFRESH_PERIOD: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingManifest,
    Prepared,
    Released,
}

/// Outcome of one issued manifest load, delivered by the loader. Exactly one
/// event arrives per load.
#[derive(Debug)]
pub enum LoadEvent {
    Completed {
        manifest: Manifest,
        load_started_at: Instant,
    },
    Canceled,
    Failed(SoraError),
}

/// Signals raised towards the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Fired exactly once per session, when the first manifest arrives.
    SourcePrepared,
    /// New data may be fetchable without a caller poll.
    ContinueLoadingRequested,
}

/// What the owner of the session should do after feeding it a load event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadDisposition {
    /// Live manifest recorded; load again no earlier than the deadline.
    RefreshAt(Instant),
    /// Nothing further to do for this load.
    Settled,
    /// An error latched; loading must stop.
    Fatal,
}

/// The manifest lifecycle state machine.
///
/// All transitions run on one logical control thread: load outcomes,
/// selection changes and release must not overlap. Timestamps are passed in
/// by the owner so refresh scheduling stays independent of wall-clock access.
pub struct SmoothSession {
    state: SessionState,
    min_load_retry_count: u32,
    factory: Arc<dyn ChunkStreamFactory>,
    events: mpsc::UnboundedSender<SessionEvent>,

    manifest: Option<Arc<Manifest>>,
    duration: Option<Duration>,
    catalog: TrackGroupCatalog,
    protection: Option<ProtectionContext>,
    streams: ActiveStreamSet,
    next_stream_id: u64,
    last_load_start: Option<Instant>,
    fatal_error: Option<Arc<SoraError>>,
}

impl SmoothSession {
    pub fn new(
        factory: Arc<dyn ChunkStreamFactory>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        Self::with_retry_count(factory, DEFAULT_MIN_LOAD_RETRY_COUNT)
    }

    pub fn with_retry_count(
        factory: Arc<dyn ChunkStreamFactory>,
        min_load_retry_count: u32,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let session = Self {
            state: SessionState::Idle,
            min_load_retry_count,
            factory,
            events,
            manifest: None,
            duration: None,
            catalog: TrackGroupCatalog::default(),
            protection: None,
            streams: ActiveStreamSet::default(),
            next_stream_id: 0,
            last_load_start: None,
            fatal_error: None,
        };
        (session, receiver)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn min_load_retry_count(&self) -> u32 {
        self.min_load_retry_count
    }

    /// Media duration from the first manifest. `None` until prepared, or for
    /// unbounded live presentations.
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn track_groups(&self) -> &TrackGroupCatalog {
        &self.catalog
    }

    pub fn manifest(&self) -> Option<&Arc<Manifest>> {
        self.manifest.as_ref()
    }

    pub fn protection(&self) -> Option<&ProtectionContext> {
        self.protection.as_ref()
    }

    pub fn active_stream_ids(&self) -> Vec<StreamId> {
        self.streams.ids()
    }

    /// Begins preparation. The owner must issue the first manifest load once
    /// this returns.
    pub fn prepare(&mut self) -> SoraResult<()> {
        if self.state != SessionState::Idle {
            return Err(SoraError::InvalidState(
                "prepare may only be called once, on an idle session",
            ));
        }
        self.streams = ActiveStreamSet::default();
        self.state = SessionState::AwaitingManifest;
        tracing::debug!("session awaiting initial manifest");
        Ok(())
    }

    /// Single dispatch entry point for load outcomes.
    pub fn handle_load_event(
        &mut self,
        event: LoadEvent,
        now: Instant,
    ) -> SoraResult<LoadDisposition> {
        match event {
            LoadEvent::Completed {
                manifest,
                load_started_at,
            } => self.on_load_completed(manifest, load_started_at, now),
            LoadEvent::Canceled => {
                self.on_load_canceled();
                Ok(LoadDisposition::Settled)
            }
            LoadEvent::Failed(error) => Ok(self.on_load_error(error)),
        }
    }

    /// Records a freshly loaded manifest.
    ///
    /// The first manifest derives the track catalog and the protection
    /// context, then fires `SourcePrepared` once for the session lifetime.
    /// Later manifests are propagated to every active stream before
    /// `ContinueLoadingRequested` is raised, so consumers never observe a
    /// stale manifest alongside the signal.
    pub fn on_load_completed(
        &mut self,
        manifest: Manifest,
        load_started_at: Instant,
        now: Instant,
    ) -> SoraResult<LoadDisposition> {
        match self.state {
            SessionState::Idle => {
                return Err(SoraError::InvalidState("load completed before prepare"))
            }
            SessionState::Released => {
                return Err(SoraError::InvalidState("load completed after release"))
            }
            SessionState::AwaitingManifest | SessionState::Prepared => {}
        }

        let manifest = Arc::new(manifest);
        self.last_load_start = Some(load_started_at);

        if self.state == SessionState::AwaitingManifest {
            // Extract the key before recording anything, so a rejected
            // manifest leaves the un-prepared session untouched.
            if let Some(protection) = &manifest.protection {
                match extract_key_id(&protection.data) {
                    Ok(key_id) => self.protection = Some(ProtectionContext::new(key_id)),
                    Err(error) => {
                        tracing::error!(%error, "protection key extraction failed");
                        self.fatal_error = Some(Arc::new(error));
                        return Ok(LoadDisposition::Fatal);
                    }
                }
            }
            self.duration = manifest.duration;
            self.catalog = build_catalog(&manifest);
            self.manifest = Some(Arc::clone(&manifest));
            self.state = SessionState::Prepared;
            tracing::info!(
                groups = self.catalog.len(),
                is_live = manifest.is_live,
                protected = self.protection.is_some(),
                "source prepared"
            );
            self.emit(SessionEvent::SourcePrepared);
        } else {
            self.manifest = Some(Arc::clone(&manifest));
            self.streams.update_manifest(&manifest);
            log::debug!("manifest refreshed, {} streams updated", self.streams.len());
            self.emit(SessionEvent::ContinueLoadingRequested);
        }

        Ok(match self.next_refresh_deadline(now) {
            Some(deadline) => LoadDisposition::RefreshAt(deadline),
            None => LoadDisposition::Settled,
        })
    }

    /// Accounting only; a canceled load changes no state.
    pub fn on_load_canceled(&mut self) {
        log::debug!("manifest load canceled");
    }

    /// Latches a load failure for [`Self::maybe_throw_prepare_error`].
    ///
    /// The loader retries transport failures internally, so any error
    /// arriving here is final for its load: structural failures because a
    /// retry cannot help, transport failures because the retry budget is
    /// already spent.
    pub fn on_load_error(&mut self, error: SoraError) -> LoadDisposition {
        if error.is_fatal_load() {
            tracing::error!(%error, "manifest load failed fatally");
        } else {
            tracing::error!(%error, "manifest load failed, retries exhausted");
        }
        self.fatal_error = Some(Arc::new(error));
        LoadDisposition::Fatal
    }

    /// Surfaces the most recent fatal load error without altering state.
    /// Only release clears a latched error.
    pub fn maybe_throw_prepare_error(&self) -> Result<(), Arc<SoraError>> {
        match &self.fatal_error {
            Some(error) => Err(Arc::clone(error)),
            None => Ok(()),
        }
    }

    /// Reconciles the active stream set against a new selection.
    ///
    /// Returns the ids of the created streams in `additions` order. An
    /// invalid selection is rejected synchronously with nothing mutated.
    pub fn select_tracks(
        &mut self,
        removals: &[StreamId],
        additions: &[TrackSelection],
        position: u64,
    ) -> SoraResult<Vec<StreamId>> {
        if self.state != SessionState::Prepared {
            return Err(SoraError::InvalidState(
                "tracks may only be selected on a prepared session",
            ));
        }
        let resolved = resolve_selections(&self.catalog, additions)?;
        let manifest = match &self.manifest {
            Some(manifest) => Arc::clone(manifest),
            None => return Err(SoraError::InvalidState("prepared session has no manifest")),
        };

        let previous = std::mem::take(&mut self.streams);
        let ctx = SelectionContext {
            manifest: &manifest,
            protection: self.protection.as_ref(),
            factory: self.factory.as_ref(),
            min_load_retry_count: self.min_load_retry_count,
        };
        let (next, created) = next_generation(
            previous,
            removals,
            &resolved,
            position,
            &mut self.next_stream_id,
            &ctx,
        );
        self.streams = next;
        tracing::debug!(
            active = self.streams.len(),
            created = created.len(),
            "track selection applied"
        );
        Ok(created)
    }

    pub fn buffered_position(&self) -> SourcePosition {
        self.streams.buffered_position()
    }

    pub fn seek_to(&mut self, position: u64) -> u64 {
        self.streams.seek_to(position)
    }

    /// This source never introduces an internal discontinuity.
    pub fn read_discontinuity(&self) -> Option<u64> {
        None
    }

    /// Tears the session down from any state. Terminal; calling anything but
    /// accessors afterwards is a programming error.
    pub fn release(&mut self) {
        self.state = SessionState::Released;
        std::mem::take(&mut self.streams).release_all();
        self.manifest = None;
        self.duration = None;
        self.catalog = TrackGroupCatalog::default();
        self.protection = None;
        self.last_load_start = None;
        self.fatal_error = None;
        tracing::debug!("session released");
    }

    fn next_refresh_deadline(&self, now: Instant) -> Option<Instant> {
        let manifest = self.manifest.as_ref()?;
        if !manifest.is_live {
            return None;
        }
        let next_eligible = self.last_load_start? + MINIMUM_MANIFEST_REFRESH_PERIOD;
        // Slow loads may already be past the floor; fire immediately then.
        Some(next_eligible.max(now))
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}
