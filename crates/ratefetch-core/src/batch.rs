//! Record lookup by identifier: one filtered batch request per chunk, then
//! single-entity requests for whatever the batch did not return.

use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::executor::{BlockingRequestExecutor, RequestExecutor};
use crate::pagination::FetchOptions;
use crate::params::QueryParams;
use crate::resource::{Record, Resource};

/// Records found by identifier, plus the identifiers that could not be fetched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    /// Ordered by identifier.
    pub records: Vec<Record>,
    pub missing_ids: Vec<String>,
}

/// Numeric identifiers sort by value and before non-numeric ones.
fn compare_ids(left: &str, right: &str) -> Ordering {
    match (left.parse::<u64>(), right.parse::<u64>()) {
        (Ok(left), Ok(right)) => left.cmp(&right),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => left.cmp(right),
    }
}

/// Numeric identifiers lose leading zeros, so `007` and `7` name one record.
fn canonical_id(id: &str) -> String {
    let id = id.trim();
    match id.parse::<u64>() {
        Ok(number) => number.to_string(),
        Err(_) => id.to_owned(),
    }
}

fn normalize_ids<I, S>(ids: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut ids = ids
        .into_iter()
        .map(|id| canonical_id(id.as_ref()))
        .filter(|id| !id.is_empty())
        .collect::<Vec<_>>();
    ids.sort_by(|left, right| compare_ids(left, right));
    ids.dedup();
    ids
}

fn batch_params(filter_param: &str, chunk: &[String]) -> QueryParams {
    QueryParams::new()
        .with(filter_param, chunk.join(","))
        .with("limit", chunk.len())
}

/// Keeps only records whose id was asked for.
fn absorb(found: &mut BTreeMap<String, Record>, resource: &Resource, wanted: &[String], records: Vec<Record>) {
    for record in records {
        if let Some(id) = resource.record_id(&record).map(|id| canonical_id(&id)) {
            if wanted.binary_search_by(|candidate| compare_ids(candidate, &id)).is_ok() {
                found.entry(id).or_insert(record);
            }
        }
    }
}

fn assemble(ids: &[String], mut found: BTreeMap<String, Record>) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();
    for id in ids {
        match found.remove(id) {
            Some(record) => outcome.records.push(record),
            None => outcome.missing_ids.push(id.clone()),
        }
    }
    outcome
}

fn still_missing(ids: &[String], found: &BTreeMap<String, Record>) -> Vec<String> {
    ids.iter()
        .filter(|id| !found.contains_key(*id))
        .cloned()
        .collect()
}

/// Async identifier lookup over a shared [`RequestExecutor`].
#[derive(Clone)]
pub struct BatchEntityFetcher {
    executor: Arc<RequestExecutor>,
    options: FetchOptions,
}

impl BatchEntityFetcher {
    pub fn new(executor: Arc<RequestExecutor>, options: FetchOptions) -> Self {
        Self { executor, options }
    }

    pub async fn fetch_by_ids<I, S>(&self, resource: &Resource, ids: I) -> BatchOutcome
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids = normalize_ids(ids);
        let mut found = BTreeMap::new();

        if let Some(filter_param) = resource.batch_filter_param.as_deref() {
            for chunk in ids.chunks(self.options.page_size.max(1) as usize) {
                let params = batch_params(filter_param, chunk);
                match self
                    .executor
                    .fetch_page(resource, &params, self.options.cache)
                    .await
                {
                    Ok(page) => absorb(&mut found, resource, &ids, page.records),
                    Err(error) => tracing::warn!(
                        path = %resource.path,
                        ids = chunk.len(),
                        %error,
                        "batch lookup failed; falling back to single lookups"
                    ),
                }
            }
        }

        let missing = still_missing(&ids, &found);
        if !missing.is_empty() {
            tracing::debug!(path = %resource.path, missing = missing.len(), "fetching ids one by one");
        }

        let permits = Arc::new(Semaphore::new(self.options.max_concurrency.max(1)));
        let resource_handle = Arc::new(resource.clone());
        let mut tasks = JoinSet::new();
        for id in missing {
            let executor = Arc::clone(&self.executor);
            let permits = Arc::clone(&permits);
            let resource = Arc::clone(&resource_handle);
            let policy = self.options.cache;
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok()?;
                match executor.fetch_entity(&resource, &id, policy).await {
                    Ok(record) => record,
                    Err(error) => {
                        tracing::warn!(path = %resource.path, id = %id, %error, "single lookup failed");
                        None
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(record)) => absorb(&mut found, resource, &ids, vec![record]),
                Ok(None) => {}
                Err(error) => tracing::error!(path = %resource.path, %error, "lookup task did not complete"),
            }
        }

        assemble(&ids, found)
    }
}

/// Thread-pool twin of [`BatchEntityFetcher`].
#[derive(Clone)]
pub struct BlockingBatchEntityFetcher {
    executor: Arc<BlockingRequestExecutor>,
    options: FetchOptions,
}

impl BlockingBatchEntityFetcher {
    pub fn new(executor: Arc<BlockingRequestExecutor>, options: FetchOptions) -> Self {
        Self { executor, options }
    }

    pub fn fetch_by_ids<I, S>(&self, resource: &Resource, ids: I) -> BatchOutcome
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids = normalize_ids(ids);
        let mut found = BTreeMap::new();

        if let Some(filter_param) = resource.batch_filter_param.as_deref() {
            for chunk in ids.chunks(self.options.page_size.max(1) as usize) {
                let params = batch_params(filter_param, chunk);
                match self.executor.fetch_page(resource, &params, self.options.cache) {
                    Ok(page) => absorb(&mut found, resource, &ids, page.records),
                    Err(error) => tracing::warn!(
                        path = %resource.path,
                        ids = chunk.len(),
                        %error,
                        "batch lookup failed; falling back to single lookups"
                    ),
                }
            }
        }

        let missing = still_missing(&ids, &found);
        if missing.is_empty() {
            return assemble(&ids, found);
        }

        let workers = self.options.max_concurrency.clamp(1, missing.len());
        let queue = Mutex::new(VecDeque::from(missing));
        let executor = self.executor.as_ref();
        let policy = self.options.cache;

        let fetched = std::thread::scope(|scope| {
            let handles = (0..workers)
                .map(|_| {
                    scope.spawn(|| {
                        let mut records = Vec::new();
                        loop {
                            let next = queue
                                .lock()
                                .expect("id queue lock should not be poisoned")
                                .pop_front();
                            let Some(id) = next else { break };
                            match executor.fetch_entity(resource, &id, policy) {
                                Ok(Some(record)) => records.push(record),
                                Ok(None) => {}
                                Err(error) => tracing::warn!(
                                    path = %resource.path,
                                    id = %id,
                                    %error,
                                    "single lookup failed"
                                ),
                            }
                        }
                        records
                    })
                })
                .collect::<Vec<_>>();

            handles
                .into_iter()
                .flat_map(|handle| handle.join().unwrap_or_default())
                .collect::<Vec<_>>()
        });

        absorb(&mut found, resource, &ids, fetched);
        assemble(&ids, found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_are_deduplicated_and_sorted_numerically() {
        assert_eq!(
            normalize_ids(["10", "2", " 2 ", "abc", "", "1"]),
            vec!["1", "2", "10", "abc"]
        );
    }

    #[test]
    fn zero_padded_ids_name_the_same_record() {
        let resource = Resource::embedded("leads");
        let wanted = normalize_ids(["007", "7", "08"]);
        let mut found = BTreeMap::new();

        absorb(
            &mut found,
            &resource,
            &wanted,
            vec![json!({"id": 7}), json!({"id": "0008"})],
        );

        assert_eq!(wanted, vec!["7", "8"]);
        let outcome = assemble(&wanted, found);
        assert_eq!(outcome.records, vec![json!({"id": 7}), json!({"id": "0008"})]);
        assert!(outcome.missing_ids.is_empty());
    }

    #[test]
    fn batch_params_join_the_chunk() {
        let params = batch_params("filter[id]", &["1".to_owned(), "2".to_owned(), "3".to_owned()]);

        assert_eq!(params.get("filter[id]"), Some("1,2,3"));
        assert_eq!(params.get("limit"), Some("3"));
    }

    #[test]
    fn unrequested_records_are_ignored() {
        let resource = Resource::embedded("leads");
        let wanted = normalize_ids(["1", "3"]);
        let mut found = BTreeMap::new();

        absorb(
            &mut found,
            &resource,
            &wanted,
            vec![json!({"id": 1}), json!({"id": 2}), json!({"name": "x"})],
        );

        let outcome = assemble(&wanted, found);
        assert_eq!(outcome.records, vec![json!({"id": 1})]);
        assert_eq!(outcome.missing_ids, vec!["3"]);
    }
}
