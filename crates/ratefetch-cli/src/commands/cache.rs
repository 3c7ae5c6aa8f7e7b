use ratefetch_core::{CacheStore, ClientConfig, SharedResources};
use serde::Serialize;
use serde_json::{json, Value};

use crate::cli::{CacheArgs, CacheCommand};
use crate::error::CliError;

use super::{Report, ReportMeta};

pub async fn run(args: &CacheArgs, config: &ClientConfig) -> Result<Report, CliError> {
    let cache = SharedResources::from_config(config).cache;
    let default_prefix = || format!("{}:", config.cache_prefix);

    let (path, data) = match &args.command {
        CacheCommand::Clear { prefix } => {
            let prefix = prefix.clone().unwrap_or_else(default_prefix);
            let task_prefix = prefix.clone();
            let removed = blocking(cache, "clear", move |cache| cache.clear(&task_prefix)).await?;
            (prefix.clone(), json!({ "prefix": prefix, "removed": removed }))
        }
        CacheCommand::Keys { prefix, limit } => {
            let prefix = prefix.clone().unwrap_or_else(default_prefix);
            let (task_prefix, limit) = (prefix.clone(), *limit);
            let listing = blocking(cache, "keys", move |cache| cache.keys(&task_prefix, limit)).await?;
            let mut data = to_value(&listing)?;
            data["prefix"] = json!(prefix);
            data["limit"] = json!(limit);
            (prefix, data)
        }
        CacheCommand::Delete { key } => {
            let task_key = key.clone();
            let removed = blocking(cache, "delete", move |cache| cache.delete(&task_key)).await?;
            (key.clone(), json!({ "key": key, "removed": removed }))
        }
        CacheCommand::Stats { prefix } => {
            let prefix = prefix.clone().unwrap_or_else(default_prefix);
            let task_prefix = prefix.clone();
            let stats = blocking(cache, "stats", move |cache| cache.stats(&task_prefix)).await?;
            let mut data = to_value(&stats)?;
            data["prefix"] = json!(prefix);
            (prefix, data)
        }
    };

    let meta = ReportMeta {
        path,
        ..ReportMeta::default()
    };
    Ok(Report::new(data, meta))
}

/// Runs a cache operation on the blocking pool; the Redis tier does socket I/O.
async fn blocking<T, F>(cache: CacheStore, operation: &str, work: F) -> Result<T, CliError>
where
    T: Send + 'static,
    F: FnOnce(&CacheStore) -> T + Send + 'static,
{
    tokio::task::spawn_blocking(move || work(&cache))
        .await
        .map_err(|error| CliError::Command(format!("cache {operation} failed: {error}")))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, CliError> {
    serde_json::to_value(value).map_err(CliError::from)
}
