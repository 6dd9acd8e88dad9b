use std::time::Duration;

use thiserror::Error;

/// An error that happens while deriving a fingerprint or producing a value.
///
/// This error enum is intended to be stored inside cache tasks and handed out
/// to every reader awaiting a task, which is why it is cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The input could not be turned into a stable fingerprint.
    ///
    /// This happens for structures nested deeper than the canonicalization
    /// limit, or for inputs that cannot be canonically rendered at all.
    /// It is surfaced synchronously by the calling operation and never
    /// mutates any cache state.
    #[error("fingerprint error: {0}")]
    Fingerprint(String),

    /// The user-supplied fetch function failed.
    ///
    /// The attached string preserves the original error message.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// The fetch did not complete within its configured deadline.
    ///
    /// The underlying fetch keeps running detached; its eventual result is
    /// discarded.
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    /// An unexpected error inside the cache itself.
    ///
    /// This variant is not intended to be persisted in tasks; seeing it means
    /// something went wrong with internal bookkeeping, for example a fetch
    /// task that died before producing an outcome.
    #[error("internal error")]
    InternalError,
}

impl CacheError {
    /// Converts an arbitrary fetch error into its cacheable form, preserving
    /// the original message.
    pub fn from_fetch_error<E: std::fmt::Display>(err: E) -> Self {
        Self::Fetch(err.to_string())
    }

    /// Whether this error was produced by the fetch deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// The contents of a cache task, either a value or the error that was
/// captured while producing it.
pub type CacheContents<T = ()> = Result<T, CacheError>;
