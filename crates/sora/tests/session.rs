use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use sora::{
    manifest::{Format, MediaType, StreamElement},
    ChunkStream, ChunkStreamFactory, HttpManifestLoader, Manifest, ManifestFetch, ManifestLoad,
    SessionDriver, SessionEvent, SmoothSession, SoraError, SoraResult, SourcePosition,
    TrackSelection, TrackStreamBinding,
};
use url::Url;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("sora=trace,wiremock=trace")
        .try_init();
}

#[derive(Default)]
struct Probe {
    manifests_seen: AtomicUsize,
}

struct RecordingStream {
    probe: Arc<Probe>,
}

impl ChunkStream for RecordingStream {
    fn buffered_position(&self) -> SourcePosition {
        SourcePosition::EndOfSource
    }

    fn seek_to(&mut self, _position: u64) {}

    fn update_manifest(&mut self, _manifest: Arc<Manifest>) {
        self.probe.manifests_seen.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&mut self) {}
}

#[derive(Default)]
struct RecordingFactory {
    probes: Mutex<Vec<Arc<Probe>>>,
}

impl RecordingFactory {
    fn probes(&self) -> Vec<Arc<Probe>> {
        self.probes.lock().unwrap().clone()
    }
}

impl ChunkStreamFactory for RecordingFactory {
    fn create_stream(&self, _binding: TrackStreamBinding<'_>) -> Box<dyn ChunkStream> {
        let probe = Arc::new(Probe::default());
        self.probes.lock().unwrap().push(Arc::clone(&probe));
        Box::new(RecordingStream { probe })
    }
}

fn test_manifest(is_live: bool) -> Manifest {
    Manifest {
        duration: if is_live {
            None
        } else {
            Some(Duration::from_secs(120))
        },
        is_live,
        stream_elements: vec![
            StreamElement {
                media_type: MediaType::Video,
                formats: vec![
                    format("v0", 1_000_000),
                    format("v1", 2_000_000),
                    format("v2", 4_000_000),
                ],
            },
            StreamElement {
                media_type: MediaType::Audio,
                formats: vec![format("a0", 128_000)],
            },
        ],
        protection: None,
    }
}

fn format(id: &str, bitrate: u32) -> Format {
    Format {
        id: id.to_string(),
        bitrate,
        codecs: None,
        width: None,
        height: None,
        language: None,
    }
}

fn json_parser(_url: &Url, data: &[u8]) -> SoraResult<Manifest> {
    serde_json::from_slice(data).map_err(|e| SoraError::ManifestParse(e.to_string()))
}

/// Serves live manifests from memory, counting loads.
struct ScriptedLoader {
    manifest: Manifest,
    loads: Arc<AtomicUsize>,
}

impl ManifestFetch for ScriptedLoader {
    async fn fetch(&self) -> SoraResult<ManifestLoad> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(ManifestLoad {
            manifest: self.manifest.clone(),
            load_started_at: Instant::now(),
        })
    }
}

/// Fails every load the way a loader does once its retry budget is gone.
struct FailingLoader {
    loads: Arc<AtomicUsize>,
}

impl ManifestFetch for FailingLoader {
    async fn fetch(&self) -> SoraResult<ManifestLoad> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Err(SoraError::RetriesExhausted { attempts: 3 })
    }
}

#[tokio::test]
async fn non_live_manifest_prepares_once_and_never_refreshes() -> anyhow::Result<()> {
    init_test_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stream.ism/Manifest"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(serde_json::to_string(&test_manifest(false))?),
        )
        .expect(1)
        .mount(&server)
        .await;

    let factory = Arc::new(RecordingFactory::default());
    let (session, mut events) =
        SmoothSession::new(Arc::clone(&factory) as Arc<dyn ChunkStreamFactory>);

    let url = Url::parse(&format!("{}/stream.ism", server.uri()))?;
    let loader = HttpManifestLoader::new(reqwest::Client::new(), &url, json_parser)?;
    let mut driver = SessionDriver::new(session, loader);
    driver.prepare().await?;

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv()).await?;
    assert_eq!(event, Some(SessionEvent::SourcePrepared));

    {
        let session = driver.session().lock().await;
        let catalog = session.track_groups();
        assert_eq!(catalog.len(), 2);
        assert!(catalog.get(0).unwrap().group.adaptive);
        assert!(!catalog.get(1).unwrap().group.adaptive);
        assert_eq!(session.duration(), Some(Duration::from_secs(120)));
        session.maybe_throw_prepare_error().unwrap();
    }

    // Non-live: loaded exactly once, no refresh, no further events.
    assert!(events.try_recv().is_err());
    driver.release().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn live_manifest_refreshes_and_updates_active_streams() {
    init_test_tracing();
    let loads = Arc::new(AtomicUsize::new(0));
    let loader = ScriptedLoader {
        manifest: test_manifest(true),
        loads: Arc::clone(&loads),
    };

    let factory = Arc::new(RecordingFactory::default());
    let (session, mut events) =
        SmoothSession::new(Arc::clone(&factory) as Arc<dyn ChunkStreamFactory>);
    let mut driver = SessionDriver::new(session, loader);
    driver.prepare().await.unwrap();

    assert_eq!(events.recv().await, Some(SessionEvent::SourcePrepared));

    driver
        .session()
        .lock()
        .await
        .select_tracks(
            &[],
            &[
                TrackSelection {
                    group: 0,
                    formats: vec![0, 1, 2],
                },
                TrackSelection {
                    group: 1,
                    formats: vec![0],
                },
            ],
            0,
        )
        .unwrap();

    // The refresh floor is five seconds from load start; paused time
    // auto-advances to it.
    let event = tokio::time::timeout(Duration::from_secs(30), events.recv())
        .await
        .unwrap();
    assert_eq!(event, Some(SessionEvent::ContinueLoadingRequested));
    assert!(loads.load(Ordering::SeqCst) >= 2);
    for probe in factory.probes() {
        assert!(probe.manifests_seen.load(Ordering::SeqCst) >= 1);
    }

    driver.release().await;
}

#[tokio::test]
async fn exhausted_retries_surface_through_the_driver() {
    init_test_tracing();
    let loads = Arc::new(AtomicUsize::new(0));
    let loader = FailingLoader {
        loads: Arc::clone(&loads),
    };

    let factory = Arc::new(RecordingFactory::default());
    let (session, mut events) =
        SmoothSession::new(Arc::clone(&factory) as Arc<dyn ChunkStreamFactory>);
    let mut driver = SessionDriver::new(session, loader);
    driver.prepare().await.unwrap();

    let error = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Err(error) = driver.maybe_throw_prepare_error().await {
                return error;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert!(matches!(*error, SoraError::RetriesExhausted { attempts: 3 }));
    // The loader owns the retry budget; the driver issues no further loads
    // and announces nothing.
    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert!(events.try_recv().is_err());
    driver.release().await;
}

#[tokio::test(start_paused = true)]
async fn no_refresh_fires_after_release() {
    init_test_tracing();
    let loads = Arc::new(AtomicUsize::new(0));
    let loader = ScriptedLoader {
        manifest: test_manifest(true),
        loads: Arc::clone(&loads),
    };

    let factory = Arc::new(RecordingFactory::default());
    let (session, mut events) =
        SmoothSession::new(Arc::clone(&factory) as Arc<dyn ChunkStreamFactory>);
    let mut driver = SessionDriver::new(session, loader);
    driver.prepare().await.unwrap();
    assert_eq!(events.recv().await, Some(SessionEvent::SourcePrepared));

    driver.release().await;
    let loads_at_release = loads.load(Ordering::SeqCst);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(loads.load(Ordering::SeqCst), loads_at_release);
    assert!(events.try_recv().is_err());
}
