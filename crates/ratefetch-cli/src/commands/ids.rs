use ratefetch_core::{ClientConfig, EnvelopeShape, FetchClient};
use serde_json::Value;

use crate::cli::IdsArgs;
use crate::error::CliError;

use super::{resource, Report, ReportMeta};

pub async fn run(
    args: &IdsArgs,
    config: &ClientConfig,
    default_shape: EnvelopeShape,
) -> Result<Report, CliError> {
    let resource = resource(&args.path, args.shape, default_shape);
    let client = FetchClient::from_config(config.clone())?;

    let outcome = client.fetch_by_ids(&resource, &args.ids).await;

    let meta = ReportMeta {
        path: resource.path.clone(),
        record_count: outcome.records.len(),
        missing_ids: outcome.missing_ids,
        ..ReportMeta::default()
    };
    Ok(Report::new(Value::Array(outcome.records), meta))
}
