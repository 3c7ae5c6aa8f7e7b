//! Scripted upstream shared by the behavior tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ratefetch_core::{
    BlockingFetchClient, BlockingHttpClient, CacheStore, ClientConfig, FetchClient, HttpClient,
    HttpError, HttpRequest, HttpResponse, RetryConfig, SharedResources, Unthrottled,
};
use serde_json::{json, Value};

pub const BASE_URL: &str = "https://crm.example.test/api/v4";

/// One request as the upstream saw it.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub url: String,
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub at: tokio::time::Instant,
}

impl SeenRequest {
    fn parse(request: &HttpRequest) -> Self {
        let relative = request
            .url
            .strip_prefix(BASE_URL)
            .unwrap_or(&request.url)
            .trim_start_matches('/');
        let (path, query) = relative.split_once('?').unwrap_or((relative, ""));
        let query = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .filter_map(|pair| pair.split_once('='))
            .map(|(name, value)| {
                (
                    urlencoding::decode(name).expect("utf-8 name").into_owned(),
                    urlencoding::decode(value).expect("utf-8 value").into_owned(),
                )
            })
            .collect();

        Self {
            url: request.url.clone(),
            path: path.to_owned(),
            query,
            headers: request.headers.clone(),
            at: tokio::time::Instant::now(),
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn page(&self) -> Option<u32> {
        self.param("page").and_then(|page| page.parse().ok())
    }
}

type Handler = dyn Fn(&SeenRequest) -> Result<HttpResponse, HttpError> + Send + Sync;
type Delay = dyn Fn(&SeenRequest) -> Option<Duration> + Send + Sync;

/// Fake transport answering every request through a handler closure.
pub struct FakeUpstream {
    handler: Box<Handler>,
    delay: Option<Box<Delay>>,
    seen: Mutex<Vec<SeenRequest>>,
}

impl FakeUpstream {
    pub fn new(
        handler: impl Fn(&SeenRequest) -> Result<HttpResponse, HttpError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            delay: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Async requests sleep for the returned duration before answering.
    pub fn with_delay(
        mut self,
        delay: impl Fn(&SeenRequest) -> Option<Duration> + Send + Sync + 'static,
    ) -> Self {
        self.delay = Some(Box::new(delay));
        self
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.seen
            .lock()
            .expect("request log should not be poisoned")
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.seen
            .lock()
            .expect("request log should not be poisoned")
            .len()
    }

    pub fn requests_for(&self, path: &str) -> Vec<SeenRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.path == path)
            .collect()
    }

    fn record(&self, request: &HttpRequest) -> SeenRequest {
        let seen = SeenRequest::parse(request);
        self.seen
            .lock()
            .expect("request log should not be poisoned")
            .push(seen.clone());
        seen
    }
}

impl HttpClient for FakeUpstream {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        let seen = self.record(&request);
        let delay = self.delay.as_ref().and_then(|delay| delay(&seen));
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            (self.handler)(&seen)
        })
    }
}

impl BlockingHttpClient for FakeUpstream {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let seen = self.record(&request);
        (self.handler)(&seen)
    }
}

/// CRM-style page body: `{"_total_items": .., "_embedded": {key: [...]}, "_links": {..}}`.
pub fn embedded_page(key: &str, records: Vec<Value>, total: Option<usize>, has_next: bool) -> String {
    let mut links = json!({ "self": { "href": format!("{BASE_URL}/{key}") } });
    if has_next {
        links["next"] = json!({ "href": format!("{BASE_URL}/{key}?page=next") });
    }
    let mut embedded = serde_json::Map::new();
    embedded.insert(key.to_owned(), Value::Array(records));
    let mut body = json!({
        "_links": links,
        "_embedded": embedded,
    });
    if let Some(total) = total {
        body["_total_items"] = json!(total);
    }
    body.to_string()
}

/// A `leads` collection of records `{"id": 1..=size}` served page by page.
#[derive(Debug, Clone)]
pub struct Collection {
    pub key: &'static str,
    pub size: usize,
    pub report_total: bool,
    pub failing_pages: HashSet<u32>,
    /// Extra records appended to a page, e.g. to simulate records shifting.
    pub extra: BTreeMap<u32, Vec<Value>>,
}

impl Collection {
    pub fn leads(size: usize) -> Self {
        Self {
            key: "leads",
            size,
            report_total: true,
            failing_pages: HashSet::new(),
            extra: BTreeMap::new(),
        }
    }

    pub fn without_total(mut self) -> Self {
        self.report_total = false;
        self
    }

    pub fn failing_page(mut self, page: u32) -> Self {
        self.failing_pages.insert(page);
        self
    }

    pub fn with_extra(mut self, page: u32, records: Vec<Value>) -> Self {
        self.extra.insert(page, records);
        self
    }

    pub fn respond(&self, request: &SeenRequest) -> Result<HttpResponse, HttpError> {
        let page = request.page().unwrap_or(1);
        let limit = request
            .param("limit")
            .and_then(|limit| limit.parse::<usize>().ok())
            .unwrap_or(250);

        if self.failing_pages.contains(&page) {
            return Ok(HttpResponse::with_status(400, r#"{"title":"Bad Request"}"#));
        }

        let start = (page as usize - 1) * limit;
        let mut records = (start + 1..=(start + limit).min(self.size))
            .map(|id| json!({ "id": id, "name": format!("lead {id}") }))
            .collect::<Vec<_>>();
        if records.is_empty() && self.extra.get(&page).is_none() {
            return Ok(HttpResponse::with_status(204, ""));
        }
        records.extend(self.extra.get(&page).cloned().unwrap_or_default());

        let has_next = start + limit < self.size;
        let total = self.report_total.then_some(self.size);
        Ok(HttpResponse::ok_json(embedded_page(self.key, records, total, has_next)))
    }

    pub fn upstream(self) -> Arc<FakeUpstream> {
        Arc::new(FakeUpstream::new(move |request| self.respond(request)))
    }
}

/// Graph-style `ads` edge of records `{"id": "ad_N"}` paged by `after` cursors.
#[derive(Debug, Clone)]
pub struct CursorCollection {
    pub path: &'static str,
    pub size: usize,
}

impl CursorCollection {
    pub fn ads(size: usize) -> Self {
        Self {
            path: "act_1/ads",
            size,
        }
    }

    pub fn respond(&self, request: &SeenRequest) -> Result<HttpResponse, HttpError> {
        let offset = request
            .param("after")
            .and_then(|cursor| cursor.strip_prefix("c"))
            .and_then(|offset| offset.parse::<usize>().ok())
            .unwrap_or(0);
        let limit = request
            .param("limit")
            .and_then(|limit| limit.parse::<usize>().ok())
            .unwrap_or(25);

        let end = (offset + limit).min(self.size);
        let data = (offset + 1..=end)
            .map(|n| json!({ "id": format!("ad_{n}") }))
            .collect::<Vec<_>>();
        let mut paging = json!({ "cursors": { "before": format!("c{offset}") } });
        if end < self.size {
            paging["cursors"]["after"] = json!(format!("c{end}"));
            paging["next"] = json!(format!("{BASE_URL}/{}?after=c{end}", self.path));
        }
        Ok(HttpResponse::ok_json(
            json!({ "data": data, "paging": paging }).to_string(),
        ))
    }

    pub fn upstream(self) -> Arc<FakeUpstream> {
        Arc::new(FakeUpstream::new(move |request| self.respond(request)))
    }
}

pub fn ad_ids(records: &[Value]) -> Vec<String> {
    records
        .iter()
        .map(|record| record["id"].as_str().expect("string id").to_owned())
        .collect()
}

pub fn config(page_size: u32) -> ClientConfig {
    let mut config = ClientConfig::new(BASE_URL).with_token("test-token");
    config.page_size = page_size;
    config
}

pub fn shared() -> SharedResources {
    SharedResources::new(Arc::new(Unthrottled::new()), CacheStore::with_default_ttl())
}

pub fn client_with(
    upstream: Arc<FakeUpstream>,
    config: ClientConfig,
    shared: SharedResources,
    retry: RetryConfig,
) -> FetchClient {
    FetchClient::builder(config)
        .with_shared(shared)
        .with_http_client(upstream)
        .with_retry(retry)
        .build()
        .expect("valid test client")
}

pub fn client(upstream: Arc<FakeUpstream>, page_size: u32) -> FetchClient {
    client_with(upstream, config(page_size), shared(), RetryConfig::no_retry())
}

pub fn blocking_client(upstream: Arc<FakeUpstream>, page_size: u32) -> BlockingFetchClient {
    FetchClient::builder(config(page_size))
        .with_shared(shared())
        .with_blocking_http_client(upstream)
        .with_retry(RetryConfig::no_retry())
        .build_blocking()
        .expect("valid test client")
}

pub fn ids(records: &[Value]) -> Vec<u64> {
    records
        .iter()
        .map(|record| record["id"].as_u64().expect("numeric id"))
        .collect()
}
