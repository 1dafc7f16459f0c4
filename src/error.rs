use thiserror::Error;

/// Errors returned by the forkwatch core.
///
/// Callers branch on the not-found / conflict / validation variants;
/// backend causes are wrapped with operation context and surfaced through
/// `Internal`, which the service boundary maps to `UnknownServerError`.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested frame does not exist in the store or index.
    #[error("frame not found")]
    FrameNotFound,

    /// A frame with the same ID is already present in the store.
    #[error("frame already stored")]
    FrameAlreadyStored,

    /// The frame failed validation before any I/O was attempted.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// An empty or malformed frame ID was supplied.
    #[error("invalid id")]
    InvalidId,

    /// The filter failed validation (e.g. no predicates where required).
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// A source type that this binary does not provide.
    #[error("unsupported source type: {0}")]
    UnsupportedSourceType(String),

    /// Generic public-boundary error; the original cause has been logged.
    #[error("unknown server error occurred")]
    UnknownServerError,

    /// A wrapped backend/infrastructure failure.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// Wrap a backend failure with the operation that produced it.
    pub fn internal<E>(operation: &'static str, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Internal(anyhow::Error::new(err).context(operation))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
