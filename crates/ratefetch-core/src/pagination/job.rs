use std::collections::{BTreeMap, HashSet};

use crate::error::FetchError;
use crate::pagination::{Discovery, PageResult};
use crate::resource::{Record, Resource};

/// A page that could not be fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct PageFailure {
    pub page: u32,
    pub error: FetchError,
}

/// Merged result of one fetch job.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    /// Records of every successful page, in page order, deduplicated by id.
    pub records: Vec<Record>,
    /// Pages requested, discovery included.
    pub pages_requested: u32,
    pub estimated_total_pages: u32,
    pub failures: Vec<PageFailure>,
    pub duplicates_removed: usize,
    /// Records may exist past the last page requested: the estimate exceeded
    /// `max_pages`, or, with no total reported, the last page still continued.
    pub truncated: bool,
}

impl FetchOutcome {
    /// No page was lost and nothing may follow the last page requested.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && !self.truncated
    }

    pub fn lost_pages(&self) -> Vec<u32> {
        self.failures.iter().map(|failure| failure.page).collect()
    }

    /// Records of a complete job, or a `PartialFetch` error naming the lost
    /// pages (or the page the job stopped at when truncated).
    pub fn into_complete(self) -> Result<Vec<Record>, FetchError> {
        if !self.failures.is_empty() {
            Err(FetchError::partial_fetch(&self.lost_pages()))
        } else if self.truncated {
            Err(FetchError::truncated(self.pages_requested))
        } else {
            Ok(self.records)
        }
    }
}

/// Working state of a fetch job between discovery and merge.
///
/// Page results may be recorded in any order; [`FetchJob::finish`] restores
/// page order. Planned pages never recorded count as lost.
#[derive(Debug)]
pub struct FetchJob {
    first_page: Vec<Record>,
    first_page_has_more: bool,
    reported_total: Option<u64>,
    estimated_total_pages: u32,
    last_page: u32,
    truncated: bool,
    results: BTreeMap<u32, PageResult>,
}

impl FetchJob {
    pub fn new(discovery: Discovery, last_page: u32, truncated: bool) -> Self {
        Self {
            first_page: discovery.first_page_items,
            first_page_has_more: discovery.has_more,
            reported_total: discovery.reported_total,
            estimated_total_pages: discovery.estimated_total_pages,
            last_page: last_page.max(1),
            truncated,
            results: BTreeMap::new(),
        }
    }

    pub fn last_page(&self) -> u32 {
        self.last_page
    }

    pub fn record(&mut self, result: PageResult) {
        self.results.insert(result.page, result);
    }

    pub fn finish(self, resource: &Resource) -> FetchOutcome {
        let FetchJob {
            first_page,
            first_page_has_more,
            reported_total,
            estimated_total_pages,
            last_page,
            mut truncated,
            mut results,
        } = self;

        // Without a total, a last page that still continued means the page
        // estimate fell short.
        let last_continues = match last_page {
            1 => first_page_has_more,
            page => results
                .get(&page)
                .is_some_and(|result| result.succeeded && result.has_more),
        };
        if reported_total.is_none() && last_continues && !truncated {
            tracing::warn!(
                path = %resource.path,
                last_page,
                "last requested page is still full; records may follow"
            );
            truncated = true;
        }

        let mut records = Vec::new();
        let mut seen = HashSet::new();
        let mut duplicates_removed = 0;
        let mut failures = Vec::new();

        let mut keep = |items: Vec<Record>, records: &mut Vec<Record>| {
            for item in items {
                let duplicate = resource
                    .record_id(&item)
                    .is_some_and(|id| !seen.insert(id));
                if duplicate {
                    duplicates_removed += 1;
                } else {
                    records.push(item);
                }
            }
        };

        keep(first_page, &mut records);
        for page in 2..=last_page {
            match results.remove(&page) {
                Some(PageResult {
                    succeeded: true,
                    items,
                    ..
                }) => keep(items, &mut records),
                Some(PageResult { error, .. }) => failures.push(PageFailure {
                    page,
                    error: error.unwrap_or_else(|| FetchError::transient("page failed")),
                }),
                None => failures.push(PageFailure {
                    page,
                    error: FetchError::timeout(format!("page {page} abandoned before completion")),
                }),
            }
        }

        for failure in &failures {
            tracing::warn!(
                path = %resource.path,
                page = failure.page,
                error = %failure.error,
                "page lost"
            );
        }
        tracing::info!(
            path = %resource.path,
            records = records.len(),
            pages_requested = last_page,
            lost_pages = failures.len(),
            duplicates_removed,
            "fetch job finished"
        );

        FetchOutcome {
            records,
            pages_requested: last_page,
            estimated_total_pages,
            failures,
            duplicates_removed,
            truncated,
        }
    }
}
