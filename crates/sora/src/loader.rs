use std::time::Instant;

use bytes::Bytes;
use reqwest::Client;
use url::Url;

use crate::{
    error::{SoraError, SoraResult},
    manifest::{normalize_manifest_url, Manifest},
    session::DEFAULT_MIN_LOAD_RETRY_COUNT,
};

/// Turns fetched manifest bytes into the structured model. The wire grammar
/// itself lives behind this seam.
pub trait ManifestParser: Send + Sync {
    fn parse(&self, url: &Url, data: &[u8]) -> SoraResult<Manifest>;
}

impl<F> ManifestParser for F
where
    F: Fn(&Url, &[u8]) -> SoraResult<Manifest> + Send + Sync,
{
    fn parse(&self, url: &Url, data: &[u8]) -> SoraResult<Manifest> {
        self(url, data)
    }
}

/// Outcome of one manifest load. `load_started_at` is the timestamp the
/// attempt began, so refresh scheduling can anchor to load start rather than
/// completion.
#[derive(Debug)]
pub struct ManifestLoad {
    pub manifest: Manifest,
    pub load_started_at: Instant,
}

/// Issues one manifest load, retrying transport failures internally up to
/// its ceiling. A returned error is final for that load.
pub trait ManifestFetch {
    fn fetch(&self) -> impl std::future::Future<Output = SoraResult<ManifestLoad>> + Send;
}

/// HTTP manifest loader. Transport failures and error statuses are retried
/// up to the configured count; a manifest that fetched but does not parse is
/// surfaced immediately without retry.
pub struct HttpManifestLoader<P> {
    client: Client,
    manifest_url: Url,
    parser: P,
    retry: u32,
}

impl<P: ManifestParser> HttpManifestLoader<P> {
    pub fn new(client: Client, url: &Url, parser: P) -> SoraResult<Self> {
        Ok(Self {
            client,
            manifest_url: normalize_manifest_url(url)?,
            parser,
            retry: DEFAULT_MIN_LOAD_RETRY_COUNT,
        })
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    /// The normalized manifest document URL this loader fetches.
    pub fn manifest_url(&self) -> &Url {
        &self.manifest_url
    }

    async fn fetch_bytes(&self) -> SoraResult<Bytes> {
        let mut retry = self.retry;
        loop {
            if retry == 0 {
                return Err(SoraError::RetriesExhausted {
                    attempts: self.retry,
                });
            }

            match self.client.get(self.manifest_url.clone()).send().await {
                Ok(response) if response.status().is_success() => {
                    match response.bytes().await {
                        Ok(bytes) => return Ok(bytes),
                        Err(error) => {
                            tracing::warn!(%error, "failed to read manifest body");
                            retry -= 1;
                        }
                    }
                }
                Ok(response) => {
                    tracing::warn!(status = %response.status(), url = %self.manifest_url, "manifest request rejected");
                    retry -= 1;
                }
                Err(error) => {
                    tracing::warn!(%error, url = %self.manifest_url, "failed to fetch manifest");
                    retry -= 1;
                }
            }
        }
    }
}

impl<P: ManifestParser> ManifestFetch for HttpManifestLoader<P> {
    async fn fetch(&self) -> SoraResult<ManifestLoad> {
        let load_started_at = Instant::now();
        let data = self.fetch_bytes().await?;
        log::debug!(
            "manifest fetched: {} bytes in {:?}",
            data.len(),
            load_started_at.elapsed()
        );

        let manifest = self.parser.parse(&self.manifest_url, &data)?;
        Ok(ManifestLoad {
            manifest,
            load_started_at,
        })
    }
}
