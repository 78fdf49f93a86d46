//! Storage collaborators consumed by the GC engine.
//!
//! The traits describe what the collectors need from the ref index, the blob
//! store and the blob reference index. The in-memory implementations back the
//! tests and the bundled binary.

mod blobs;
mod references;
mod refs;

pub use blobs::*;
pub use references::*;
pub use refs::*;

use futures::stream::{self, BoxStream, StreamExt};

use crate::error::StorageResult;

/// Number of entries fetched per page by the in-memory listings.
pub const LIST_PAGE_SIZE: usize = 1000;

/// Builds a lazy listing from a page fetcher.
///
/// `fetch` receives the marker of the last entry already returned and yields
/// at most [`LIST_PAGE_SIZE`] following entries. Only one page is held in
/// memory at a time, and entries added or removed between pages are picked up
/// or skipped the way a continuation-token listing would.
pub(crate) fn paged_stream<K, T, F>(fetch: F) -> BoxStream<'static, StorageResult<T>>
where
    K: Clone + Send + 'static,
    T: Send + 'static,
    F: Fn(Option<&K>) -> Vec<(K, T)> + Send + 'static,
{
    stream::unfold(
        (fetch, None::<K>, false),
        |(fetch, marker, exhausted)| async move {
            if exhausted {
                return None;
            }
            let page = fetch(marker.as_ref());
            if page.is_empty() {
                return None;
            }
            let exhausted = page.len() < LIST_PAGE_SIZE;
            let next_marker = page.last().map(|(k, _)| k.clone());
            let items: Vec<StorageResult<T>> = page.into_iter().map(|(_, v)| Ok(v)).collect();
            Some((stream::iter(items), (fetch, next_marker, exhausted)))
        },
    )
    .flatten()
    .boxed()
}
