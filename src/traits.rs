use crate::model::{PageRequest, PageResult};
use async_trait::async_trait;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Unexpected HTTP status {0}")]
    Status(u16),
    #[error("Malformed page payload: {0}")]
    Malformed(String),
    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("Fetch failed: {0}")]
    Other(String),
}

impl FetchError {
    pub fn other(message: impl std::fmt::Display) -> Self {
        Self::Other(message.to_string())
    }
}

/// Source of pages for a harvest.
///
/// Implementations handle their own protocol details (and may retry
/// internally); the harvester only sees the final outcome of each call.
#[async_trait]
pub trait PageFetcher<T>: Send + Sync {
    /// Fetches one page of `request.limit` items.
    async fn fetch(&self, request: PageRequest) -> Result<PageResult<T>, FetchError>;
}

/// Adapts an async closure into a [`PageFetcher`].
pub struct FnFetcher<F> {
    f: F,
}

/// Wraps `f` so it can be handed to a harvest as its page source.
///
/// ```ignore
/// let fetcher = fetcher_fn(|req: PageRequest| async move {
///     Ok(PageResult::new(vec![req.page]).with_total_pages(3))
/// });
/// ```
pub fn fetcher_fn<F>(f: F) -> FnFetcher<F> {
    FnFetcher { f }
}

#[async_trait]
impl<T, F, Fut> PageFetcher<T> for FnFetcher<F>
where
    T: Send + 'static,
    F: Fn(PageRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<PageResult<T>, FetchError>> + Send,
{
    async fn fetch(&self, request: PageRequest) -> Result<PageResult<T>, FetchError> {
        (self.f)(request).await
    }
}

/// Progress hook, called with `(fetched_pages, total_pages)`.
pub type ProgressCallback = Arc<dyn Fn(usize, u32) + Send + Sync>;

/// Fire-and-forget progress reporting. A panicking callback is logged and
/// swallowed so it can never abort a harvest.
#[derive(Clone, Default)]
pub struct Progress {
    callback: Option<ProgressCallback>,
}

impl Progress {
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        Self { callback }
    }

    pub fn report(&self, fetched: usize, total_pages: u32) {
        let Some(callback) = &self.callback else {
            return;
        };

        if catch_unwind(AssertUnwindSafe(|| callback(fetched, total_pages))).is_err() {
            warn!(fetched, total_pages, "Progress callback panicked; ignoring");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_fetcher_fn_forwards_request() {
        let fetcher = fetcher_fn(|req: PageRequest| async move {
            Ok::<_, FetchError>(PageResult::new(vec![req.page, req.limit]))
        });

        let page = fetcher.fetch(PageRequest::new(4, 25)).await.unwrap();
        assert_eq!(page.items, vec![4, 25]);
        assert_eq!(page.total_pages, None);
    }

    #[test]
    fn test_progress_swallows_panics() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let progress = Progress::new(Some(Arc::new(move |fetched: usize, _total: u32| {
            seen.fetch_add(1, Ordering::SeqCst);
            if fetched == 1 {
                panic!("callback failure");
            }
        })));

        progress.report(1, 2);
        progress.report(2, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_progress_without_callback_is_noop() {
        Progress::default().report(1, 1);
    }
}
