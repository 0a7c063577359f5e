use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShioriError {
    /// Missing or malformed identifiers passed by the caller. Fatal to that
    /// call, never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Event-channel handshake or transport failure after the retry budget
    /// is exhausted.
    #[error("channel error: {0}")]
    Channel(String),

    /// Remote store unreachable for a cache-populating read. The previous
    /// cached value is preserved.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// A best-effort push (progress tick, view tracking) failed. Always
    /// swallowed by callers; the next scheduled tick is the retry.
    #[error("transient sync failure: {0}")]
    TransientSync(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
