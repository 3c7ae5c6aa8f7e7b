use std::time::Duration;

use ratefetch_core::{ClientConfig, EnvelopeShape, FetchClient, QueryParams};
use serde_json::Value;

use crate::cli::FetchArgs;
use crate::error::CliError;

use super::{resource, Report, ReportError, ReportMeta};

pub async fn run(
    args: &FetchArgs,
    config: &ClientConfig,
    default_shape: EnvelopeShape,
) -> Result<Report, CliError> {
    let params = parse_params(&args.params)?;
    let resource = resource(&args.path, args.shape, default_shape);
    let client = FetchClient::from_config(config.clone())?;

    let outcome = match args.deadline_ms {
        Some(deadline_ms) => {
            client
                .fetch_all_within(&resource, &params, Duration::from_millis(deadline_ms))
                .await?
        }
        None => client.fetch_all(&resource, &params).await?,
    };

    let errors = outcome
        .failures
        .iter()
        .map(|failure| ReportError::from_fetch(&failure.error, Some(failure.page)))
        .collect();
    let meta = ReportMeta {
        path: resource.path.clone(),
        record_count: outcome.records.len(),
        pages_requested: Some(outcome.pages_requested),
        lost_pages: outcome.lost_pages(),
        truncated: outcome.truncated,
        duplicates_removed: outcome.duplicates_removed,
        ..ReportMeta::default()
    };

    Ok(Report::new(Value::Array(outcome.records), meta).with_errors(errors))
}

fn parse_params(raw: &[String]) -> Result<QueryParams, CliError> {
    raw.iter()
        .map(|pair| match pair.split_once('=') {
            Some((name, value)) if !name.trim().is_empty() => {
                Ok((name.trim().to_owned(), value.to_owned()))
            }
            _ => Err(CliError::InvalidParam {
                value: pair.clone(),
            }),
        })
        .collect()
}
