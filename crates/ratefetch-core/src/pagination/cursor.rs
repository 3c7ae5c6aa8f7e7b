use crate::error::FetchError;
use crate::pagination::{Discovery, FetchJob, FetchOptions, FetchOutcome, PageResult};
use crate::params::QueryParams;
use crate::resource::{PageEnvelope, Paging, Record, Resource};

/// Sequential walk over a cursor-paged collection.
///
/// The first page is requested with `limit` only; each later page carries the
/// cursor returned by the page before it. The walk ends when a page names no
/// next cursor, when a page fails, or at `max_pages`, which flags the outcome
/// as truncated. Results merge through [`FetchJob`] like a page-numbered job.
#[derive(Debug)]
pub struct CursorWalk {
    base_params: QueryParams,
    cursor_param: String,
    page_size: u32,
    max_pages: u32,
    first_page: Vec<Record>,
    results: Vec<PageResult>,
    next_cursor: Option<String>,
    truncated: bool,
}

impl CursorWalk {
    /// Parameters of the first page.
    pub fn first_page_params(base_params: &QueryParams, options: &FetchOptions) -> QueryParams {
        base_params.clone().with("limit", options.page_size)
    }

    /// Starts a walk from the first page. `None` when `resource` is not cursor-paged.
    pub fn start(
        resource: &Resource,
        base_params: &QueryParams,
        first_page: PageEnvelope,
        options: &FetchOptions,
    ) -> Option<Self> {
        let Paging::Cursor { cursor_param, .. } = &resource.paging else {
            return None;
        };
        let mut walk = Self {
            base_params: base_params.clone(),
            cursor_param: cursor_param.clone(),
            page_size: options.page_size,
            max_pages: options.max_pages.max(1),
            first_page: Vec::new(),
            results: Vec::new(),
            next_cursor: None,
            truncated: false,
        };
        walk.next_cursor = walk.follow(resource, 1, &first_page);
        walk.first_page = first_page.records;
        Some(walk)
    }

    /// Pages fetched or given up on so far, the first included.
    pub fn pages_walked(&self) -> u32 {
        1 + self.results.len() as u32
    }

    /// Page number and parameters of the next request, or `None` when the
    /// walk is over.
    pub fn next_request(&mut self, resource: &Resource) -> Option<(u32, QueryParams)> {
        let cursor = self.next_cursor.take()?;
        let page = self.pages_walked() + 1;
        if page > self.max_pages {
            tracing::warn!(
                path = %resource.path,
                max_pages = self.max_pages,
                "cursor walk reached max_pages; result will be truncated"
            );
            self.truncated = true;
            return None;
        }
        let params = self
            .base_params
            .clone()
            .with("limit", self.page_size)
            .with(self.cursor_param.as_str(), cursor);
        Some((page, params))
    }

    pub fn record(&mut self, resource: &Resource, page: u32, result: Result<PageEnvelope, FetchError>) {
        match result {
            Ok(envelope) => {
                self.next_cursor = self.follow(resource, page, &envelope);
                self.results.push(PageResult::succeeded(page, envelope.records));
            }
            Err(error) => {
                self.next_cursor = None;
                self.results.push(PageResult::failed(page, error));
            }
        }
    }

    /// Gives up on `page`, e.g. when a deadline passed while it was in flight.
    pub fn abandon(&mut self, page: u32) {
        self.next_cursor = None;
        self.results.push(PageResult::failed(
            page,
            FetchError::timeout(format!("page {page} abandoned before completion")),
        ));
    }

    pub fn finish(self, resource: &Resource) -> FetchOutcome {
        let last_page = self.pages_walked();
        let discovery = Discovery {
            first_page_items: self.first_page,
            estimated_total_pages: last_page,
            reported_total: None,
            has_more: false,
        };
        let mut job = FetchJob::new(discovery, last_page, self.truncated);
        for result in self.results {
            job.record(result);
        }
        job.finish(resource)
    }

    /// Cursor of the page after `page`. A next page advertised without a
    /// cursor cannot be reached and is recorded as lost.
    fn follow(&mut self, resource: &Resource, page: u32, envelope: &PageEnvelope) -> Option<String> {
        if let Some(cursor) = &envelope.next_cursor {
            return Some(cursor.clone());
        }
        if envelope.has_next == Some(true) {
            self.results.push(PageResult::failed(
                page + 1,
                FetchError::decode(format!(
                    "{}: page {page} links a next page but carries no '{}' cursor",
                    resource.path, self.cursor_param
                )),
            ));
        }
        None
    }
}
