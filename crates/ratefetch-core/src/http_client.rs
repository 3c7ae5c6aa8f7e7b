use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::params::QueryParams;

/// Authentication strategy applied to outgoing HTTP requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpAuth {
    None,
    BearerToken(String),
    Header { name: String, value: String },
}

impl HttpAuth {
    pub fn apply(&self, headers: &mut BTreeMap<String, String>) {
        match self {
            Self::None => {}
            Self::BearerToken(token) => {
                headers.insert(String::from("authorization"), format!("Bearer {token}"));
            }
            Self::Header { name, value } => {
                headers.insert(name.to_ascii_lowercase(), value.clone());
            }
        }
    }
}

/// GET request envelope handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub timeout_ms: u64,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: BTreeMap::new(),
            timeout_ms: 30_000,
        }
    }

    pub fn with_query(mut self, params: &QueryParams) -> Self {
        if !params.is_empty() {
            let separator = if self.url.contains('?') { '&' } else { '?' };
            self.url = format!("{}{separator}{}", self.url, params.to_query_string());
        }
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_auth(mut self, auth: &HttpAuth) -> Self {
        auth.apply(&mut self.headers);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// HTTP response envelope returned by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok_json(body: impl Into<String>) -> Self {
        Self::with_status(200, body)
    }

    pub fn with_status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Transport failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpErrorKind {
    Timeout,
    Connect,
    Other,
}

/// Transport-level HTTP error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    kind: HttpErrorKind,
    message: String,
}

impl HttpError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: HttpErrorKind::Other,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: HttpErrorKind::Timeout,
            message: message.into(),
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self {
            kind: HttpErrorKind::Connect,
            message: message.into(),
        }
    }

    pub const fn kind(&self) -> HttpErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for HttpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HttpError {}

/// Async transport contract used by task-based fetches.
pub trait HttpClient: Send + Sync {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>>;
}

/// Thread-blocking transport contract used by thread-pool fetches.
pub trait BlockingHttpClient: Send + Sync {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

fn classify_reqwest_error(error: reqwest::Error) -> HttpError {
    if error.is_timeout() {
        HttpError::timeout(format!("request timeout: {error}"))
    } else if error.is_connect() {
        HttpError::connect(format!("connection failed: {error}"))
    } else {
        HttpError::new(format!("request failed: {error}"))
    }
}

const USER_AGENT: &str = concat!("ratefetch/", env!("CARGO_PKG_VERSION"));

/// Production async transport using reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Arc<reqwest::Client>,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            client: Arc::new(
                reqwest::Client::builder()
                    .user_agent(USER_AGENT)
                    .build()
                    .unwrap_or_else(|_| reqwest::Client::new()),
            ),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for ReqwestHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        Box::pin(async move {
            let mut builder = self
                .client
                .get(&request.url)
                .timeout(Duration::from_millis(request.timeout_ms));
            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }

            let response = builder.send().await.map_err(classify_reqwest_error)?;
            let status = response.status().as_u16();
            let body = response.text().await.map_err(classify_reqwest_error)?;

            Ok(HttpResponse { status, body })
        })
    }
}

/// Production blocking transport using `reqwest::blocking`.
///
/// Must be constructed and dropped outside of a tokio runtime.
#[derive(Debug, Clone)]
pub struct ReqwestBlockingClient {
    client: reqwest::blocking::Client,
}

impl ReqwestBlockingClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::blocking::Client::builder()
                .user_agent(USER_AGENT)
                .build()
                .unwrap_or_else(|_| reqwest::blocking::Client::new()),
        }
    }
}

impl Default for ReqwestBlockingClient {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockingHttpClient for ReqwestBlockingClient {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let mut builder = self
            .client
            .get(&request.url)
            .timeout(Duration::from_millis(request.timeout_ms));
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let response = builder.send().map_err(classify_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.text().map_err(classify_reqwest_error)?;

        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_auth_populates_authorization_header() {
        let request = HttpRequest::get("https://crm.example.test/api/v4/leads")
            .with_auth(&HttpAuth::BearerToken(String::from("token-123")));

        assert_eq!(
            request.headers.get("authorization").map(String::as_str),
            Some("Bearer token-123")
        );
    }

    #[test]
    fn custom_header_auth_lowercases_name() {
        let request = HttpRequest::get("https://ads.example.test/v23.0/me").with_auth(
            &HttpAuth::Header {
                name: String::from("X-Api-Key"),
                value: String::from("demo"),
            },
        );

        assert_eq!(
            request.headers.get("x-api-key").map(String::as_str),
            Some("demo")
        );
    }

    #[test]
    fn query_is_appended_with_the_right_separator() {
        let params = QueryParams::new().with("page", 2);

        let plain = HttpRequest::get("https://crm.example.test/leads").with_query(&params);
        assert_eq!(plain.url, "https://crm.example.test/leads?page=2");

        let existing = HttpRequest::get("https://crm.example.test/leads?with=contacts")
            .with_query(&params);
        assert_eq!(
            existing.url,
            "https://crm.example.test/leads?with=contacts&page=2"
        );

        let empty = HttpRequest::get("https://crm.example.test/leads")
            .with_query(&QueryParams::new());
        assert_eq!(empty.url, "https://crm.example.test/leads");
    }

    #[test]
    fn no_content_counts_as_success() {
        assert!(HttpResponse::with_status(204, "").is_success());
        assert!(!HttpResponse::with_status(429, "").is_success());
    }
}
