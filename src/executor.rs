use crate::harvest::assembler::ResultAssembler;
use crate::model::{PageRequest, PageResult};
use crate::traits::{FetchError, PageFetcher, Progress};
use futures::FutureExt;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

/// Outcome of one pass of the worker pool over a list of pages.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassReport {
    /// Pages of this pass whose slot is still empty, ascending
    pub failed: Vec<u32>,
    /// Fetch attempts that settled during the pass
    pub attempts: usize,
}

/// Bounded pool of workers draining a queue of page numbers.
///
/// Each pass spawns `min(max_parallel, pages)` workers. Every worker pops the
/// next page from the shared queue, fetches it once and reports the outcome
/// over a channel; the pass itself is the only writer to the assembler.
pub struct ParallelWorker<T> {
    fetcher: Arc<dyn PageFetcher<T>>,
    limit: u32,
    max_parallel: usize,
    fetch_timeout: Option<Duration>,
}

impl<T> ParallelWorker<T>
where
    T: Send + 'static,
{
    pub fn new(fetcher: Arc<dyn PageFetcher<T>>, limit: u32, max_parallel: usize) -> Self {
        Self {
            fetcher,
            limit,
            max_parallel: max_parallel.max(1),
            fetch_timeout: None,
        }
    }

    /// Fails any single fetch that takes longer than `timeout`.
    pub fn with_fetch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Fetches every page in `pages` exactly once.
    ///
    /// Successes are written into `assembler`; failures are logged and end up
    /// in [`PassReport::failed`]. A failing page never aborts the pass.
    /// `pages` is expected to hold distinct page numbers.
    #[instrument(skip_all, fields(pages = pages.len(), max_parallel = self.max_parallel))]
    pub async fn run(
        &self,
        pages: &[u32],
        assembler: &mut ResultAssembler<T>,
        progress: &Progress,
    ) -> PassReport {
        if pages.is_empty() {
            return PassReport::default();
        }

        let queue = Arc::new(Mutex::new(pages.iter().copied().collect::<VecDeque<_>>()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut workers = JoinSet::new();

        for _ in 0..self.max_parallel.min(pages.len()) {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            let fetcher = Arc::clone(&self.fetcher);
            let limit = self.limit;
            let fetch_timeout = self.fetch_timeout;

            workers.spawn(async move {
                loop {
                    let Some(page) = queue.lock().await.pop_front() else {
                        break;
                    };
                    let request = PageRequest::new(page, limit);
                    let outcome = fetch_with_timeout(fetcher.as_ref(), request, fetch_timeout).await;
                    if tx.send((page, outcome)).is_err() {
                        break;
                    }
                }
            });
        }
        // The channel closes once every worker has exited, i.e. the queue is
        // drained and nothing is in flight.
        drop(tx);

        let mut attempts = 0;
        while let Some((page, outcome)) = rx.recv().await {
            attempts += 1;
            match outcome {
                Ok(result) => {
                    debug!(page, items = result.items.len(), "Page fetched");
                    assembler.write(page, result.items);
                }
                Err(e) => warn!(page, error = %e, "Page fetch failed"),
            }
            progress.report(assembler.filled(), assembler.total_pages());
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Page worker terminated abnormally");
            }
        }

        PassReport {
            failed: assembler.missing(pages.iter().copied()),
            attempts,
        }
    }
}

/// Runs one fetch to completion. A timeout or a panic inside the fetcher
/// settles as an ordinary [`FetchError`].
pub(crate) async fn fetch_with_timeout<T>(
    fetcher: &dyn PageFetcher<T>,
    request: PageRequest,
    fetch_timeout: Option<Duration>,
) -> Result<PageResult<T>, FetchError> {
    let guarded = AssertUnwindSafe(async move { fetcher.fetch(request).await }).catch_unwind();

    let settled = match fetch_timeout {
        Some(limit) => match tokio::time::timeout(limit, guarded).await {
            Ok(settled) => settled,
            Err(_) => return Err(FetchError::Timeout(limit)),
        },
        None => guarded.await,
    };

    settled.unwrap_or_else(|panic| {
        Err(FetchError::Other(format!(
            "fetch of page {} panicked: {}",
            request.page,
            panic_message(panic.as_ref())
        )))
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
