use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::CacheContents;

/// Produces the value behind a cache entry.
///
/// The fetcher is invoked at most once per live fingerprint: concurrent
/// readers of the same input coalesce onto a single invocation. The input is
/// handed over by value; the cache keeps its own copy for re-fetches and for
/// [`keys`](crate::MemoCache::keys).
///
/// Closures returning futures implement this trait directly:
///
/// ```
/// use memoflight::{CacheContents, Fetcher};
///
/// fn takes_fetcher(_: impl Fetcher<String, u64>) {}
///
/// takes_fetcher(|name: String| async move { Ok(name.len() as u64) });
/// ```
pub trait Fetcher<K, V>: Send + Sync + 'static {
    /// Computes the value for `input`.
    ///
    /// Errors are captured on the entry and fanned out to every reader,
    /// subject to the configured error policy.
    fn fetch(&self, input: K) -> BoxFuture<'static, CacheContents<V>>;
}

impl<K, V, F, Fut> Fetcher<K, V> for F
where
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = CacheContents<V>> + Send + 'static,
{
    fn fetch(&self, input: K) -> BoxFuture<'static, CacheContents<V>> {
        (self)(input).boxed()
    }
}
