//! Paginated harvest pipeline.
//!
//! This module provides the [`HarvestPipeline`] coordinator that drives one
//! harvest through its stages (Bootstrap → Parallel → Retry → Assembly) with:
//! - Bounded concurrency via [`ParallelWorker`]
//! - Back-to-back retry rounds over the pages that failed
//! - Ordered reassembly via [`ResultAssembler`]
//! - Structured logging via `tracing`

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::executor::{fetch_with_timeout, ParallelWorker};
use crate::harvest::assembler::ResultAssembler;
use crate::model::{HarvestResult, HarvestStats, PageRequest};
use crate::traits::{FetchError, PageFetcher, Progress, ProgressCallback};

// ============================================================================
// Pipeline Configuration
// ============================================================================

/// Tunables for one harvest.
///
/// Every field has a default, so a partial config deserializes cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestOptions {
    /// First page to fetch (default: 1). Pages below it are out of scope.
    pub start_page: u32,

    /// Items requested per page (default: 500)
    pub limit: u32,

    /// Maximum fetches in flight at once (default: 10)
    pub max_parallel: usize,

    /// Retry rounds over failed pages after the first pass (default: 2)
    pub max_retries: u32,

    /// Fixed pause before each retry round (default: none)
    #[serde(rename = "retry_delay_ms", with = "millis")]
    pub retry_delay: Duration,

    /// Per-fetch timeout (default: none, a hung fetch stalls the harvest)
    #[serde(rename = "fetch_timeout_ms", with = "optional_millis")]
    pub fetch_timeout: Option<Duration>,

    /// Largest page count the harvest will accept from the source
    /// (default: 100 000)
    pub max_pages: u32,
}

const DEFAULT_MAX_PAGES: u32 = 100_000;

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            start_page: 1,
            limit: 500,
            max_parallel: 10,
            max_retries: 2,
            retry_delay: Duration::ZERO,
            fetch_timeout: None,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

impl HarvestOptions {
    /// Checks that every option is inside its domain.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Configuration`] if the start page, page size,
    /// concurrency cap or page cap is zero, or if the start page lies beyond
    /// the page cap.
    pub fn validate(&self) -> Result<(), HarvestError> {
        if self.start_page == 0 {
            return Err(HarvestError::Configuration(
                "start_page must be at least 1".to_string(),
            ));
        }
        if self.limit == 0 {
            return Err(HarvestError::Configuration(
                "limit must be at least 1".to_string(),
            ));
        }
        if self.max_parallel == 0 {
            return Err(HarvestError::Configuration(
                "max_parallel must be at least 1".to_string(),
            ));
        }
        if self.max_pages == 0 {
            return Err(HarvestError::Configuration(
                "max_pages must be at least 1".to_string(),
            ));
        }
        if self.start_page > self.max_pages {
            return Err(HarvestError::Configuration(format!(
                "start_page {} is beyond max_pages {}",
                self.start_page, self.max_pages
            )));
        }
        Ok(())
    }
}

/// Durations as whole milliseconds in config files.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod optional_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(duration) => super::millis::serialize(duration, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}

// ============================================================================
// Pipeline Errors
// ============================================================================

/// Fatal harvest errors. Failures of pages after the start page never show
/// up here; they are reported through [`HarvestResult::failed_pages`].
#[derive(thiserror::Error, Debug)]
pub enum HarvestError {
    /// No usable fetcher, or an option outside its domain
    #[error("Invalid harvest configuration: {0}")]
    Configuration(String),

    /// The first page could not be fetched or was malformed
    #[error("Bootstrap fetch of page {page} failed: {source}")]
    Bootstrap { page: u32, source: FetchError },
}

// ============================================================================
// Pipeline Executor
// ============================================================================

/// Harvests every page of a paginated source.
///
/// The pipeline runs these stages for each call to [`execute`](Self::execute):
/// 1. **Bootstrap**: fetch the start page alone to learn the page count
/// 2. **Parallel**: fetch the remaining pages with bounded concurrency
/// 3. **Retry**: re-run the worker over failed pages, up to `max_retries` rounds
/// 4. **Assembly**: concatenate pages in ascending order
///
/// All harvest state lives inside one `execute` call, so a pipeline can be
/// reused and shared across tasks.
///
/// # Example
///
/// ```ignore
/// use page_harvester::{fetcher_fn, HarvestPipeline, PageRequest, PageResult};
///
/// let pipeline = HarvestPipeline::builder()
///     .fetcher(fetcher_fn(|req: PageRequest| async move {
///         Ok(PageResult::new(vec![req.page]).with_total_pages(5))
///     }))
///     .with_max_parallel(2)
///     .on_progress(|fetched, total| println!("{fetched}/{total}"))
///     .build()?;
///
/// let result = pipeline.execute().await?;
/// assert_eq!(result.data, vec![1, 2, 3, 4, 5]);
/// ```
pub struct HarvestPipeline<T> {
    fetcher: Arc<dyn PageFetcher<T>>,
    options: HarvestOptions,
    progress: Progress,
}

impl<T> HarvestPipeline<T>
where
    T: Send + 'static,
{
    pub fn builder() -> HarvestPipelineBuilder<T> {
        HarvestPipelineBuilder::default()
    }

    pub fn options(&self) -> &HarvestOptions {
        &self.options
    }

    /// Runs one complete harvest.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Bootstrap`] if the start page fails, times out,
    /// panics, is malformed or reports more than `max_pages` pages. Nothing is
    /// retried at this stage.
    #[instrument(skip(self), fields(start_page = self.options.start_page, limit = self.options.limit))]
    pub async fn execute(&self) -> Result<HarvestResult<T>, HarvestError> {
        let start = Instant::now();
        let options = &self.options;
        let mut stats = HarvestStats::default();

        // ====================================================================
        // Stage 1: Bootstrap
        // ====================================================================

        info!("Fetching bootstrap page");
        stats.attempts += 1;
        let first = fetch_with_timeout(
            self.fetcher.as_ref(),
            PageRequest::new(options.start_page, options.limit),
            options.fetch_timeout,
        )
        .await
        .map_err(|source| HarvestError::Bootstrap {
            page: options.start_page,
            source,
        })?;

        let total_pages = match first.total_pages {
            Some(total) if total > 0 => total,
            reported => {
                warn!(
                    ?reported,
                    "Source did not report a positive page count; assuming a single page"
                );
                1
            }
        };
        if total_pages > options.max_pages {
            return Err(HarvestError::Bootstrap {
                page: options.start_page,
                source: FetchError::Malformed(format!(
                    "source reported {} pages, above max_pages {}",
                    total_pages, options.max_pages
                )),
            });
        }
        stats.total_pages = total_pages;

        let mut assembler = ResultAssembler::new(total_pages.max(options.start_page));
        assembler.write(options.start_page, first.items);
        self.progress.report(assembler.filled(), total_pages);

        let remaining: Vec<u32> = (options.start_page..=total_pages).skip(1).collect();
        if remaining.is_empty() {
            debug!(total_pages, "Nothing beyond the bootstrap page");
            return Ok(Self::finish(assembler, Vec::new(), stats, start));
        }

        // ====================================================================
        // Stage 2: Parallel fetch
        // ====================================================================

        info!(
            total_pages,
            pages = remaining.len(),
            max_parallel = options.max_parallel,
            "Starting parallel fetch"
        );

        let worker = ParallelWorker::new(
            Arc::clone(&self.fetcher),
            options.limit,
            options.max_parallel,
        )
        .with_fetch_timeout(options.fetch_timeout);

        let report = worker.run(&remaining, &mut assembler, &self.progress).await;
        stats.attempts += report.attempts;
        let mut failed = report.failed;

        // ====================================================================
        // Stage 3: Retry rounds
        // ====================================================================

        while !failed.is_empty() && stats.retry_rounds < options.max_retries {
            if !options.retry_delay.is_zero() {
                tokio::time::sleep(options.retry_delay).await;
            }
            stats.retry_rounds += 1;
            info!(
                round = stats.retry_rounds,
                failed = failed.len(),
                "Retrying failed pages"
            );

            let report = worker.run(&failed, &mut assembler, &self.progress).await;
            stats.attempts += report.attempts;
            failed = report.failed;
        }

        // ====================================================================
        // Stage 4: Assembly
        // ====================================================================

        if !failed.is_empty() {
            warn!(?failed, "Pages still failing after all retry rounds");
        }

        Ok(Self::finish(assembler, failed, stats, start))
    }

    fn finish(
        assembler: ResultAssembler<T>,
        failed_pages: Vec<u32>,
        mut stats: HarvestStats,
        start: Instant,
    ) -> HarvestResult<T> {
        stats.pages_fetched = assembler.filled();
        stats.total_duration_ms = start.elapsed().as_millis() as u64;

        info!(
            total_pages = stats.total_pages,
            pages_fetched = stats.pages_fetched,
            failed = failed_pages.len(),
            duration_ms = stats.total_duration_ms,
            "Harvest completed"
        );

        HarvestResult {
            data: assembler.flatten(),
            failed_pages,
            stats,
        }
    }
}

// ============================================================================
// Pipeline Builder
// ============================================================================

/// Builder for [`HarvestPipeline`].
///
/// Default configuration matches [`HarvestOptions::default`]; a fetcher is
/// required.
pub struct HarvestPipelineBuilder<T> {
    fetcher: Option<Arc<dyn PageFetcher<T>>>,
    options: HarvestOptions,
    on_progress: Option<ProgressCallback>,
}

impl<T> Default for HarvestPipelineBuilder<T> {
    fn default() -> Self {
        Self {
            fetcher: None,
            options: HarvestOptions::default(),
            on_progress: None,
        }
    }
}

impl<T> HarvestPipelineBuilder<T>
where
    T: Send + 'static,
{
    /// Sets the page source.
    pub fn fetcher<P>(self, fetcher: P) -> Self
    where
        P: PageFetcher<T> + 'static,
    {
        self.shared_fetcher(Arc::new(fetcher))
    }

    /// Sets a page source that is shared with other owners.
    pub fn shared_fetcher(mut self, fetcher: Arc<dyn PageFetcher<T>>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Replaces all options at once.
    pub fn with_options(mut self, options: HarvestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_start_page(mut self, start_page: u32) -> Self {
        self.options.start_page = start_page;
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.options.limit = limit;
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.options.max_parallel = max_parallel;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.options.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.options.retry_delay = delay;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.options.fetch_timeout = Some(timeout);
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.options.max_pages = max_pages;
        self
    }

    /// Registers a callback fired with `(fetched_pages, total_pages)` after
    /// the bootstrap page and after every later fetch attempt settles.
    ///
    /// Panics inside the callback are caught and logged.
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, u32) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    /// # Errors
    ///
    /// Returns [`HarvestError::Configuration`] if no fetcher was set or an
    /// option is out of range.
    pub fn build(self) -> Result<HarvestPipeline<T>, HarvestError> {
        let fetcher = self.fetcher.ok_or_else(|| {
            HarvestError::Configuration("no page fetcher configured".to_string())
        })?;
        self.options.validate()?;

        Ok(HarvestPipeline {
            fetcher,
            options: self.options,
            progress: Progress::new(self.on_progress),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PageResult;
    use crate::traits::fetcher_fn;
    use std::sync::Mutex;

    fn numbered_pages(total_pages: u32) -> impl PageFetcher<u32> + 'static {
        fetcher_fn(move |req: PageRequest| async move {
            Ok::<_, FetchError>(PageResult::new(vec![req.page]).with_total_pages(total_pages))
        })
    }

    #[test]
    fn test_default_options() {
        let options = HarvestOptions::default();
        assert_eq!(options.start_page, 1);
        assert_eq!(options.limit, 500);
        assert_eq!(options.max_parallel, 10);
        assert_eq!(options.max_retries, 2);
        assert!(options.retry_delay.is_zero());
        assert!(options.fetch_timeout.is_none());
        assert_eq!(options.max_pages, 100_000);
    }

    #[test]
    fn test_durations_are_configured_in_millis() {
        let options: HarvestOptions =
            serde_json::from_str(r#"{"retry_delay_ms": 250, "fetch_timeout_ms": 1000}"#).unwrap();
        assert_eq!(options.retry_delay, Duration::from_millis(250));
        assert_eq!(options.fetch_timeout, Some(Duration::from_millis(1000)));

        let value = serde_json::to_value(&options).unwrap();
        assert_eq!(value["retry_delay_ms"], 250);
        assert_eq!(value["fetch_timeout_ms"], 1000);
        assert!(value.get("retry_delay").is_none());

        let value = serde_json::to_value(HarvestOptions::default()).unwrap();
        assert_eq!(value["retry_delay_ms"], 0);
        assert!(value["fetch_timeout_ms"].is_null());
        assert_eq!(
            serde_json::from_value::<HarvestOptions>(value).unwrap(),
            HarvestOptions::default()
        );
    }

    #[test]
    fn test_partial_options_deserialize_with_defaults() {
        let options: HarvestOptions =
            serde_json::from_str(r#"{"max_parallel": 3, "limit": 50}"#).unwrap();
        assert_eq!(options.max_parallel, 3);
        assert_eq!(options.limit, 50);
        assert_eq!(options.start_page, 1);
        assert_eq!(options.max_retries, 2);
    }

    #[test]
    fn test_build_without_fetcher_fails() {
        let result = HarvestPipeline::<u32>::builder().build();
        assert!(matches!(result, Err(HarvestError::Configuration(_))));
    }

    #[test]
    fn test_build_rejects_zero_options() {
        for builder in [
            HarvestPipeline::<u32>::builder().with_max_parallel(0),
            HarvestPipeline::builder().with_limit(0),
            HarvestPipeline::builder().with_start_page(0),
            HarvestPipeline::builder().with_max_pages(0),
            HarvestPipeline::builder().with_start_page(11).with_max_pages(10),
        ] {
            let result = builder.fetcher(numbered_pages(1)).build();
            assert!(matches!(result, Err(HarvestError::Configuration(_))));
        }
    }

    #[tokio::test]
    async fn test_pages_below_start_page_are_out_of_scope() {
        let requested = Arc::new(Mutex::new(Vec::new()));
        let log = requested.clone();
        let pipeline = HarvestPipeline::builder()
            .fetcher(fetcher_fn(move |req: PageRequest| {
                log.lock().unwrap().push(req.page);
                async move {
                    Ok::<_, FetchError>(PageResult::new(vec![req.page]).with_total_pages(5))
                }
            }))
            .with_start_page(3)
            .build()
            .unwrap();

        let result = pipeline.execute().await.unwrap();

        assert_eq!(result.data, vec![3, 4, 5]);
        assert!(result.failed_pages.is_empty());
        let mut requested = requested.lock().unwrap().clone();
        requested.sort_unstable();
        assert_eq!(requested, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn test_start_page_beyond_reported_total() {
        let pipeline = HarvestPipeline::builder()
            .fetcher(numbered_pages(2))
            .with_start_page(4)
            .build()
            .unwrap();

        let result = pipeline.execute().await.unwrap();

        assert_eq!(result.data, vec![4]);
        assert!(result.failed_pages.is_empty());
        assert_eq!(result.stats.attempts, 1);
    }

    #[tokio::test]
    async fn test_zero_total_defaults_to_single_page() {
        let pipeline = HarvestPipeline::builder()
            .fetcher(numbered_pages(0))
            .build()
            .unwrap();

        let result = pipeline.execute().await.unwrap();

        assert_eq!(result.data, vec![1]);
        assert_eq!(result.stats.total_pages, 1);
        assert_eq!(result.stats.retry_rounds, 0);
    }

    #[tokio::test]
    async fn test_pipeline_forwards_limit() {
        let pipeline = HarvestPipeline::builder()
            .fetcher(fetcher_fn(|req: PageRequest| async move {
                Ok::<_, FetchError>(PageResult::new(vec![req.limit]).with_total_pages(2))
            }))
            .with_limit(25)
            .build()
            .unwrap();

        let result = pipeline.execute().await.unwrap();
        assert_eq!(result.data, vec![25, 25]);
    }

    #[tokio::test]
    async fn test_bootstrap_timeout_is_fatal() {
        let pipeline = HarvestPipeline::builder()
            .fetcher(fetcher_fn(|_req: PageRequest| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, FetchError>(PageResult::new(vec![0u32]))
            }))
            .with_fetch_timeout(Duration::from_millis(20))
            .build()
            .unwrap();

        let err = pipeline.execute().await.unwrap_err();
        assert!(matches!(
            err,
            HarvestError::Bootstrap {
                page: 1,
                source: FetchError::Timeout(_)
            }
        ));
    }

    #[tokio::test]
    async fn test_page_count_above_cap_is_fatal() {
        let calls = Arc::new(Mutex::new(0usize));
        let seen = calls.clone();
        let pipeline = HarvestPipeline::builder()
            .fetcher(fetcher_fn(move |req: PageRequest| {
                *seen.lock().unwrap() += 1;
                async move {
                    Ok::<_, FetchError>(PageResult::new(vec![req.page]).with_total_pages(u32::MAX))
                }
            }))
            .build()
            .unwrap();

        let err = pipeline.execute().await.unwrap_err();

        assert!(matches!(
            err,
            HarvestError::Bootstrap {
                page: 1,
                source: FetchError::Malformed(_)
            }
        ));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_page_count_at_cap_is_harvested() {
        let pipeline = HarvestPipeline::builder()
            .fetcher(numbered_pages(4))
            .with_max_pages(4)
            .build()
            .unwrap();

        let result = pipeline.execute().await.unwrap();
        assert_eq!(result.data, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_bootstrap_panic_is_fatal() {
        let pipeline = HarvestPipeline::builder()
            .fetcher(fetcher_fn(|req: PageRequest| async move {
                if req.page == 1 {
                    panic!("bootstrap decoder bug");
                }
                Ok::<_, FetchError>(PageResult::new(vec![req.page]))
            }))
            .build()
            .unwrap();

        let err = pipeline.execute().await.unwrap_err();
        assert!(matches!(
            err,
            HarvestError::Bootstrap {
                page: 1,
                source: FetchError::Other(_)
            }
        ));
    }
}
