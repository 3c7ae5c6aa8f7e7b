use crate::error::FetchError;
use crate::executor::{BlockingRequestExecutor, RequestExecutor};
use crate::params::QueryParams;
use crate::pagination::FetchOptions;
use crate::resource::{PageEnvelope, Record, Resource};

/// Result of the page-1 discovery request.
#[derive(Debug, Clone, PartialEq)]
pub struct Discovery {
    pub first_page_items: Vec<Record>,
    pub estimated_total_pages: u32,
    /// Total item count, when the upstream reported one.
    pub reported_total: Option<u64>,
    /// Records may follow the first page.
    pub has_more: bool,
}

/// Estimates the page count of a result set from its first page.
///
/// The upstream does not always report a total. A full first page without a
/// total falls back to `unknown_total_page_cap` rather than an open-ended scan.
pub fn estimate_total_pages(first_page: &PageEnvelope, page_size: u32, unknown_total_page_cap: u32) -> u32 {
    let page_size = u64::from(page_size.max(1));

    if let Some(total) = first_page.total {
        let pages = total.div_ceil(page_size).max(1);
        return u32::try_from(pages).unwrap_or(u32::MAX);
    }
    if (first_page.records.len() as u64) < page_size {
        return 1;
    }
    if first_page.has_next == Some(false) {
        return 1;
    }
    unknown_total_page_cap.max(1)
}

fn into_discovery(envelope: PageEnvelope, options: &FetchOptions, resource: &Resource) -> Discovery {
    let estimated_total_pages =
        estimate_total_pages(&envelope, options.page_size, options.unknown_total_page_cap);
    tracing::debug!(
        path = %resource.path,
        first_page = envelope.records.len(),
        reported_total = ?envelope.total,
        estimated_total_pages,
        "page discovery finished"
    );
    Discovery {
        has_more: envelope.continues(options.page_size),
        reported_total: envelope.total,
        first_page_items: envelope.records,
        estimated_total_pages,
    }
}

/// Issues the page-1 discovery request through the async executor.
pub struct PageDiscoverer<'a> {
    executor: &'a RequestExecutor,
}

impl<'a> PageDiscoverer<'a> {
    pub fn new(executor: &'a RequestExecutor) -> Self {
        Self { executor }
    }

    pub async fn discover(
        &self,
        resource: &Resource,
        base_params: &QueryParams,
        options: &FetchOptions,
    ) -> Result<Discovery, FetchError> {
        let params = base_params.for_page(1, options.page_size);
        let envelope = self
            .executor
            .fetch_page(resource, &params, options.cache)
            .await?;
        Ok(into_discovery(envelope, options, resource))
    }
}

/// Issues the page-1 discovery request through the blocking executor.
pub struct BlockingPageDiscoverer<'a> {
    executor: &'a BlockingRequestExecutor,
}

impl<'a> BlockingPageDiscoverer<'a> {
    pub fn new(executor: &'a BlockingRequestExecutor) -> Self {
        Self { executor }
    }

    pub fn discover(
        &self,
        resource: &Resource,
        base_params: &QueryParams,
        options: &FetchOptions,
    ) -> Result<Discovery, FetchError> {
        let params = base_params.for_page(1, options.page_size);
        let envelope = self.executor.fetch_page(resource, &params, options.cache)?;
        Ok(into_discovery(envelope, options, resource))
    }
}
