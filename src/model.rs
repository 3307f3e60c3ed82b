use serde::{Deserialize, Serialize};

/// One page request handed to a [`PageFetcher`](crate::traits::PageFetcher).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageRequest {
    /// 1-based page number
    pub page: u32,
    /// Number of items requested per page
    pub limit: u32,
}

impl PageRequest {
    pub fn new(page: u32, limit: u32) -> Self {
        Self { page, limit }
    }
}

/// Items of one page plus the total page count, if the source reports it.
///
/// `total_pages` is only read from the first page of a harvest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult<T> {
    pub items: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u32>,
}

impl<T> PageResult<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            total_pages: None,
        }
    }

    pub fn with_total_pages(mut self, total_pages: u32) -> Self {
        self.total_pages = Some(total_pages);
        self
    }
}

/// Outcome of a harvest: every harvested item in page order, plus the pages
/// that still failed after all retry rounds.
///
/// A non-empty `failed_pages` alongside valid `data` is a partial success, not
/// an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvestResult<T> {
    pub data: Vec<T>,
    /// Ascending page numbers whose slot stayed empty
    pub failed_pages: Vec<u32>,
    pub stats: HarvestStats,
}

impl<T> HarvestResult<T> {
    pub fn is_complete(&self) -> bool {
        self.failed_pages.is_empty()
    }
}

/// Statistics about one harvest call.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvestStats {
    /// Page count fixed by the bootstrap page
    pub total_pages: u32,

    /// Pages that ended with a filled slot, bootstrap included
    pub pages_fetched: usize,

    /// Fetch attempts issued, bootstrap included
    pub attempts: usize,

    /// Retry rounds actually run (0..=max_retries)
    pub retry_rounds: u32,

    /// Wall-clock time of the whole harvest (milliseconds)
    pub total_duration_ms: u64,
}
