mod cache;
mod fetch;
mod ids;

use std::time::Instant;

use ratefetch_core::{ClientConfig, EnvelopeShape, FetchError, ProviderPolicy, Resource};
use serde::Serialize;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::cli::{Cli, Command, ShapeArg};
use crate::error::CliError;

#[derive(Debug, Clone, Serialize)]
pub struct ReportError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

impl ReportError {
    pub fn from_fetch(error: &FetchError, page: Option<u32>) -> Self {
        Self {
            code: error.code().to_owned(),
            message: error.message().to_owned(),
            retryable: error.retryable(),
            page,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReportMeta {
    pub path: String,
    pub record_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages_requested: Option<u32>,
    pub lost_pages: Vec<u32>,
    pub missing_ids: Vec<String>,
    pub truncated: bool,
    pub duplicates_removed: usize,
    pub latency_ms: u64,
    pub generated_at: String,
}

/// JSON document printed on stdout.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub data: Value,
    pub meta: ReportMeta,
    pub errors: Vec<ReportError>,
}

impl Report {
    pub fn new(data: Value, meta: ReportMeta) -> Self {
        Self {
            data,
            meta,
            errors: Vec::new(),
        }
    }

    pub fn with_errors(mut self, errors: Vec<ReportError>) -> Self {
        self.errors.extend(errors);
        self
    }

    pub fn is_complete(&self) -> bool {
        self.meta.lost_pages.is_empty() && self.meta.missing_ids.is_empty() && !self.meta.truncated
    }
}

pub async fn run(cli: &Cli) -> Result<Report, CliError> {
    let config = load_config(cli)?;
    let started = Instant::now();

    let mut report = match &cli.command {
        Command::Fetch(args) => fetch::run(args, &config, default_shape(cli)).await?,
        Command::Ids(args) => ids::run(args, &config, default_shape(cli)).await?,
        Command::Cache(args) => cache::run(args, &config).await?,
    };

    report.meta.latency_ms = started.elapsed().as_millis() as u64;
    report.meta.generated_at = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|error| CliError::Command(error.to_string()))?;
    Ok(report)
}

fn load_config(cli: &Cli) -> Result<ClientConfig, CliError> {
    let mut config = ClientConfig::from_env()?;
    if let Some(provider) = cli.provider {
        config = ProviderPolicy::default_for(provider.into()).apply(config);
    }
    if let Some(max_concurrency) = cli.max_concurrency {
        config.max_concurrency = max_concurrency;
    }
    if let Some(max_pages) = cli.max_pages {
        config.max_pages = max_pages;
    }
    config.validate()?;
    tracing::debug!(
        base_url = %config.base_url,
        max_rps = config.max_rps,
        page_size = config.page_size,
        max_pages = config.max_pages,
        redis = config.redis_url.is_some(),
        "configuration loaded"
    );
    Ok(config)
}

fn default_shape(cli: &Cli) -> EnvelopeShape {
    cli.provider
        .map(|provider| ProviderPolicy::default_for(provider.into()).shape)
        .unwrap_or(EnvelopeShape::Embedded)
}

fn resource(path: &str, shape: Option<ShapeArg>, default: EnvelopeShape) -> Resource {
    Resource::with_shape(path, shape.map(EnvelopeShape::from).unwrap_or(default))
}
