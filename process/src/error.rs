use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures of the fingerprinting and matching pipeline.
///
/// "Nothing matched" is not an error; see [`crate::matcher::MatchOutcome`].
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to decode audio: {0}")]
    Decode(String),

    #[error("insufficient audio: {samples} samples is shorter than one {window}-sample window")]
    InsufficientAudio { samples: usize, window: usize },

    #[error("sample rate mismatch: expected {expected}Hz, got {actual}Hz")]
    SampleRateMismatch { expected: u32, actual: u32 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("fingerprint index unavailable: {0}")]
    IndexUnavailable(#[source] BoxError),

    #[error("song catalog unavailable: {0}")]
    CatalogUnavailable(#[source] BoxError),
}

impl Error {
    pub(crate) fn index<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::IndexUnavailable(Box::new(error))
    }

    pub(crate) fn catalog<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::CatalogUnavailable(Box::new(error))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
