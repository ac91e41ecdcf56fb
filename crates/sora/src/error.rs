use thiserror::Error;

#[derive(Error, Debug)]
pub enum SoraError {
    #[error("invalid session state: {0}")]
    InvalidState(&'static str),

    #[error("failed to parse manifest: {0}")]
    ManifestParse(String),

    #[error("HTTP error: {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error("manifest load gave up after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("malformed protection data: {0}")]
    MalformedProtectionData(String),

    #[error("invalid selection: group {group} out of {groups}")]
    InvalidSelection { group: usize, groups: usize },

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),
}

impl SoraError {
    /// Whether a failed manifest load must not be retried.
    ///
    /// A manifest that fetched but did not parse will not parse any better on
    /// the next attempt, and a protection header that cannot yield a key
    /// leaves the session without a decryption context. Everything
    /// transport-shaped is worth another try, up to the loader's ceiling.
    pub fn is_fatal_load(&self) -> bool {
        matches!(
            self,
            Self::ManifestParse(_) | Self::MalformedProtectionData(_)
        )
    }
}

pub type SoraResult<T> = Result<T, SoraError>;
