use std::{sync::Arc, time::Instant};

use tokio::{sync::Mutex, task::JoinHandle};

use crate::{
    error::SoraResult,
    loader::ManifestFetch,
    session::{LoadDisposition, LoadEvent, SmoothSession},
    SoraError,
};

/// Owns a [`SmoothSession`] and the background task that keeps its manifest
/// loaded, refreshing live manifests on the session's cadence.
pub struct SessionDriver<L> {
    session: Arc<Mutex<SmoothSession>>,
    loader: Arc<L>,
    load_task: Option<JoinHandle<()>>,
}

impl<L> SessionDriver<L>
where
    L: ManifestFetch + Send + Sync + 'static,
{
    pub fn new(session: SmoothSession, loader: L) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            loader: Arc::new(loader),
            load_task: None,
        }
    }

    /// The shared session, for track selection and buffering queries.
    pub fn session(&self) -> &Arc<Mutex<SmoothSession>> {
        &self.session
    }

    /// Transitions the session into preparation and issues the first
    /// manifest load.
    pub async fn prepare(&mut self) -> SoraResult<()> {
        self.session.lock().await.prepare()?;
        let session = Arc::clone(&self.session);
        let loader = Arc::clone(&self.loader);
        self.load_task = Some(tokio::spawn(load_loop(session, loader)));
        Ok(())
    }

    pub async fn maybe_throw_prepare_error(&self) -> Result<(), Arc<SoraError>> {
        self.session.lock().await.maybe_throw_prepare_error()
    }

    /// Tears everything down. The refresh task must not observe a released
    /// session, so it is stopped before the session state is cleared.
    pub async fn release(&mut self) {
        if let Some(task) = self.load_task.take() {
            task.abort();
        }
        self.session.lock().await.release();
    }
}

async fn load_loop<L: ManifestFetch>(session: Arc<Mutex<SmoothSession>>, loader: Arc<L>) {
    loop {
        tracing::debug!("loading manifest");
        let result = loader.fetch().await;

        let disposition = {
            let mut session = session.lock().await;
            let event = match result {
                Ok(load) => LoadEvent::Completed {
                    manifest: load.manifest,
                    load_started_at: load.load_started_at,
                },
                Err(error) => LoadEvent::Failed(error),
            };
            session.handle_load_event(event, Instant::now())
        };

        match disposition {
            Ok(LoadDisposition::RefreshAt(deadline)) => {
                tokio::time::sleep_until(deadline.into()).await;
            }
            Ok(LoadDisposition::Settled | LoadDisposition::Fatal) => break,
            Err(error) => {
                log::error!("manifest load event rejected: {error}");
                break;
            }
        }
    }
}
