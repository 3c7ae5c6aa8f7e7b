use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::error::FetchError;
use crate::executor::{BlockingRequestExecutor, RequestExecutor};
use crate::pagination::{
    check_base_params, page_requests, BlockingPageDiscoverer, CursorWalk, Discovery, FetchJob,
    FetchOptions, FetchOutcome, PageDiscoverer, PageRequest, PageResult,
};
use crate::params::QueryParams;
use crate::resource::{Paging, Resource};

fn plan(discovery: Discovery, options: &FetchOptions, resource: &Resource) -> FetchJob {
    let (last_page, truncated) = options.last_page(discovery.estimated_total_pages);
    if truncated {
        tracing::warn!(
            path = %resource.path,
            estimated_total_pages = discovery.estimated_total_pages,
            max_pages = options.max_pages,
            "page estimate exceeds max_pages; result will be truncated"
        );
    }
    FetchJob::new(discovery, last_page, truncated)
}

/// Async paginator: one tokio task per page, bounded by a semaphore and paced
/// by the executor's shared limiter.
#[derive(Clone)]
pub struct ParallelPaginator {
    executor: Arc<RequestExecutor>,
    options: FetchOptions,
}

impl ParallelPaginator {
    pub fn new(executor: Arc<RequestExecutor>, options: FetchOptions) -> Self {
        Self { executor, options }
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    pub async fn fetch_all(
        &self,
        resource: &Resource,
        base_params: &QueryParams,
    ) -> Result<FetchOutcome, FetchError> {
        self.run(resource, base_params, &self.options, None).await
    }

    pub async fn fetch_all_with(
        &self,
        resource: &Resource,
        base_params: &QueryParams,
        options: &FetchOptions,
    ) -> Result<FetchOutcome, FetchError> {
        self.run(resource, base_params, options, None).await
    }

    /// Like [`ParallelPaginator::fetch_all`], giving up on outstanding pages at
    /// `deadline`. Pages still in flight are reported as lost.
    pub async fn fetch_all_within(
        &self,
        resource: &Resource,
        base_params: &QueryParams,
        deadline: Instant,
    ) -> Result<FetchOutcome, FetchError> {
        self.run(resource, base_params, &self.options, Some(deadline))
            .await
    }

    async fn run(
        &self,
        resource: &Resource,
        base_params: &QueryParams,
        options: &FetchOptions,
        deadline: Option<Instant>,
    ) -> Result<FetchOutcome, FetchError> {
        check_base_params(resource, base_params)?;
        if let Paging::Cursor { .. } = resource.paging {
            return self.walk(resource, base_params, options, deadline).await;
        }

        let discoverer = PageDiscoverer::new(&self.executor);
        let discovery = match deadline {
            Some(deadline) => tokio::time::timeout_at(
                deadline,
                discoverer.discover(resource, base_params, options),
            )
            .await
            .map_err(|_| {
                FetchError::timeout(format!("{}: deadline passed during discovery", resource.path))
            })??,
            None => discoverer.discover(resource, base_params, options).await?,
        };

        let mut job = plan(discovery, options, resource);
        let requests = page_requests(base_params, job.last_page(), options.page_size);
        if requests.is_empty() {
            return Ok(job.finish(resource));
        }

        let permits = Arc::new(Semaphore::new(options.max_concurrency.max(1)));
        let resource_handle = Arc::new(resource.clone());
        let mut tasks = JoinSet::new();
        for request in requests {
            let executor = Arc::clone(&self.executor);
            let permits = Arc::clone(&permits);
            let resource = Arc::clone(&resource_handle);
            let policy = options.cache;
            let page_size = options.page_size;
            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return PageResult::failed(request.page, FetchError::transient("worker set closed"));
                };
                fetch_one(&executor, &resource, &request, page_size, policy).await
            });
        }

        loop {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        tracing::warn!(
                            path = %resource.path,
                            outstanding = tasks.len(),
                            "deadline passed; abandoning outstanding pages"
                        );
                        tasks.abort_all();
                        break;
                    }
                },
                None => tasks.join_next().await,
            };

            match next {
                Some(Ok(result)) => job.record(result),
                Some(Err(error)) => {
                    tracing::error!(path = %resource.path, %error, "page task did not complete");
                }
                None => break,
            }
        }

        Ok(job.finish(resource))
    }

    /// Cursor-paged collections: one page at a time, each request carrying the
    /// cursor of the page before it.
    async fn walk(
        &self,
        resource: &Resource,
        base_params: &QueryParams,
        options: &FetchOptions,
        deadline: Option<Instant>,
    ) -> Result<FetchOutcome, FetchError> {
        let first_params = CursorWalk::first_page_params(base_params, options);
        let first = self.executor.fetch_page(resource, &first_params, options.cache);
        let first = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, first).await.map_err(|_| {
                FetchError::timeout(format!("{}: deadline passed on the first page", resource.path))
            })??,
            None => first.await?,
        };
        let Some(mut walk) = CursorWalk::start(resource, base_params, first, options) else {
            return Err(not_cursor_paged(resource));
        };

        while let Some((page, params)) = walk.next_request(resource) {
            let fetch = self.executor.fetch_page(resource, &params, options.cache);
            match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, fetch).await {
                    Ok(result) => walk.record(resource, page, result),
                    Err(_) => {
                        tracing::warn!(path = %resource.path, page, "deadline passed; abandoning cursor walk");
                        walk.abandon(page);
                    }
                },
                None => walk.record(resource, page, fetch.await),
            }
        }
        tracing::debug!(path = %resource.path, pages = walk.pages_walked(), "cursor walk finished");
        Ok(walk.finish(resource))
    }
}

fn not_cursor_paged(resource: &Resource) -> FetchError {
    FetchError::invalid_request(format!("{}: resource is not cursor-paged", resource.path))
}

async fn fetch_one(
    executor: &RequestExecutor,
    resource: &Resource,
    request: &PageRequest,
    page_size: u32,
    policy: crate::cache::CachePolicy,
) -> PageResult {
    match executor.fetch_page(resource, &request.params(), policy).await {
        Ok(envelope) => PageResult::from_envelope(request.page, envelope, page_size),
        Err(error) => PageResult::failed(request.page, error),
    }
}

/// Thread-pool paginator: `max_concurrency` scoped OS threads drain a shared
/// queue of page requests.
#[derive(Clone)]
pub struct BlockingPaginator {
    executor: Arc<BlockingRequestExecutor>,
    options: FetchOptions,
}

impl BlockingPaginator {
    pub fn new(executor: Arc<BlockingRequestExecutor>, options: FetchOptions) -> Self {
        Self { executor, options }
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    pub fn fetch_all(
        &self,
        resource: &Resource,
        base_params: &QueryParams,
    ) -> Result<FetchOutcome, FetchError> {
        self.fetch_all_with(resource, base_params, &self.options)
    }

    pub fn fetch_all_with(
        &self,
        resource: &Resource,
        base_params: &QueryParams,
        options: &FetchOptions,
    ) -> Result<FetchOutcome, FetchError> {
        check_base_params(resource, base_params)?;
        if let Paging::Cursor { .. } = resource.paging {
            return self.walk(resource, base_params, options);
        }

        let discovery =
            BlockingPageDiscoverer::new(&self.executor).discover(resource, base_params, options)?;

        let mut job = plan(discovery, options, resource);
        let requests = page_requests(base_params, job.last_page(), options.page_size);
        if requests.is_empty() {
            return Ok(job.finish(resource));
        }

        let workers = options.max_concurrency.clamp(1, requests.len());
        let queue = Mutex::new(VecDeque::from(requests));
        let executor = self.executor.as_ref();
        let policy = options.cache;
        let page_size = options.page_size;

        let results = std::thread::scope(|scope| {
            let handles = (0..workers)
                .map(|_| {
                    scope.spawn(|| {
                        let mut done = Vec::new();
                        loop {
                            let next = queue
                                .lock()
                                .expect("page queue lock should not be poisoned")
                                .pop_front();
                            let Some(request) = next else { break };
                            let result =
                                match executor.fetch_page(resource, &request.params(), policy) {
                                    Ok(envelope) => {
                                        PageResult::from_envelope(request.page, envelope, page_size)
                                    }
                                    Err(error) => PageResult::failed(request.page, error),
                                };
                            done.push(result);
                        }
                        done
                    })
                })
                .collect::<Vec<_>>();

            handles
                .into_iter()
                .flat_map(|handle| match handle.join() {
                    Ok(done) => done,
                    Err(_) => {
                        tracing::error!(path = %resource.path, "page worker panicked");
                        Vec::new()
                    }
                })
                .collect::<Vec<_>>()
        });

        for result in results {
            job.record(result);
        }
        Ok(job.finish(resource))
    }

    fn walk(
        &self,
        resource: &Resource,
        base_params: &QueryParams,
        options: &FetchOptions,
    ) -> Result<FetchOutcome, FetchError> {
        let first_params = CursorWalk::first_page_params(base_params, options);
        let first = self.executor.fetch_page(resource, &first_params, options.cache)?;
        let Some(mut walk) = CursorWalk::start(resource, base_params, first, options) else {
            return Err(not_cursor_paged(resource));
        };

        while let Some((page, params)) = walk.next_request(resource) {
            let result = self.executor.fetch_page(resource, &params, options.cache);
            walk.record(resource, page, result);
        }
        tracing::debug!(path = %resource.path, pages = walk.pages_walked(), "cursor walk finished");
        Ok(walk.finish(resource))
    }
}
