//! Page discovery, parallel page fan-out and result merging.
//!
//! A fetch job over a page-numbered collection runs in two phases: one
//! discovery request for page 1, then the remaining pages concurrently. Async
//! jobs spawn one tokio task per page, at most `max_concurrency` of them past
//! the semaphore at once, all paced by the shared limiter; blocking jobs hand
//! pages to a bounded pool of scoped OS threads.
//!
//! Cursor-paged collections cannot be fanned out: each page names the next, so
//! [`CursorWalk`] follows them one by one up to `max_pages`.

mod cursor;
mod discovery;
mod job;
mod paginator;

pub use cursor::CursorWalk;
pub use discovery::{estimate_total_pages, BlockingPageDiscoverer, Discovery, PageDiscoverer};
pub use job::{FetchJob, FetchOutcome, PageFailure};
pub use paginator::{BlockingPaginator, ParallelPaginator};

use crate::cache::CachePolicy;
use crate::error::FetchError;
use crate::params::QueryParams;
use crate::resource::{PageEnvelope, Record, Resource};

/// Tuning knobs for one fetch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Pages (or per-id lookups) in flight at once.
    pub max_concurrency: usize,
    /// Hard cap on the number of pages requested, discovery included.
    pub max_pages: u32,
    pub page_size: u32,
    /// Page estimate used when the first page is full and no total is reported.
    pub unknown_total_page_cap: u32,
    pub cache: CachePolicy,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            max_pages: 50,
            page_size: 250,
            unknown_total_page_cap: 10,
            cache: CachePolicy::default(),
        }
    }
}

impl FetchOptions {
    /// Last page to request for `estimated_total_pages`, and whether the
    /// `max_pages` cap cut the estimate short.
    pub fn last_page(&self, estimated_total_pages: u32) -> (u32, bool) {
        let cap = self.max_pages.max(1);
        (estimated_total_pages.clamp(1, cap), estimated_total_pages > cap)
    }
}

/// Immutable description of one page fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub base_params: QueryParams,
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn new(base_params: QueryParams, page: u32, page_size: u32) -> Self {
        Self {
            base_params,
            page,
            page_size,
        }
    }

    pub fn params(&self) -> QueryParams {
        self.base_params.for_page(self.page, self.page_size)
    }
}

/// Outcome of one [`PageRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct PageResult {
    pub page: u32,
    pub items: Vec<Record>,
    pub succeeded: bool,
    /// Records may follow this page; see [`PageEnvelope::continues`].
    pub has_more: bool,
    pub error: Option<FetchError>,
}

impl PageResult {
    pub fn succeeded(page: u32, items: Vec<Record>) -> Self {
        Self {
            page,
            items,
            succeeded: true,
            has_more: false,
            error: None,
        }
    }

    pub fn from_envelope(page: u32, envelope: PageEnvelope, page_size: u32) -> Self {
        Self {
            has_more: envelope.continues(page_size),
            ..Self::succeeded(page, envelope.records)
        }
    }

    pub fn failed(page: u32, error: FetchError) -> Self {
        Self {
            page,
            items: Vec::new(),
            succeeded: false,
            has_more: false,
            error: Some(error),
        }
    }
}

/// Rejects base parameters that would fight the paginator's own.
fn check_base_params(resource: &Resource, base_params: &QueryParams) -> Result<(), FetchError> {
    let reserved = resource
        .paging_params()
        .into_iter()
        .filter(|name| base_params.get(name).is_some())
        .collect::<Vec<_>>();
    if reserved.is_empty() {
        return Ok(());
    }
    Err(FetchError::invalid_request(format!(
        "{}: {} set by the paginator; drop it from the query",
        resource.path,
        reserved.join(", ")
    )))
}

fn page_requests(base_params: &QueryParams, last_page: u32, page_size: u32) -> Vec<PageRequest> {
    (2..=last_page)
        .map(|page| PageRequest::new(base_params.clone(), page, page_size))
        .collect()
}
