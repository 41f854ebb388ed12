use std::path::PathBuf;

/// Errors raised by the analysis, cache, playback and hardware layers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cached analysis for {path} was produced with a different configuration")]
    ConfigMismatch { path: PathBuf },

    #[error("no cached analysis at {path}")]
    CacheMissing { path: PathBuf },

    #[error("cached analysis at {path} is unreadable: {reason}")]
    CacheCorrupt { path: PathBuf, reason: String },

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("hardware write failed on channel {channel}: {reason}")]
    Hardware { channel: usize, reason: String },

    #[error("audio sink failed: {0}")]
    Sink(String),

    #[error("a precompute task for {song} is already running")]
    PrecomputeInFlight { song: PathBuf },

    #[error("precompute worker for {song} panicked")]
    WorkerPanicked { song: PathBuf },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// True for the cache-layer errors that mean "rebuild", not "give up".
    pub fn is_cache_miss(&self) -> bool {
        matches!(
            self,
            Error::CacheMissing { .. } | Error::CacheCorrupt { .. } | Error::ConfigMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
