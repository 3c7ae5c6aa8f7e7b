//! Normalized query parameters.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Query parameter set with a canonical (sorted) iteration order.
///
/// Filters arrive already normalized from the caller (`filter[pipeline_id]`,
/// `with`, ...). Sorting by key makes two logically identical parameter sets
/// render the same query string no matter the insertion order, which the cache
/// key derivation relies on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    entries: BTreeMap<String, String>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl ToString) {
        self.entries.insert(name.into(), value.to_string());
    }

    pub fn with(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.entries.remove(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Copy of these parameters positioned at `page` with `limit` records per page.
    pub fn for_page(&self, page: u32, limit: u32) -> Self {
        self.clone().with("page", page).with("limit", limit)
    }

    /// Percent-encoded `name=value&...` string in canonical order.
    pub fn to_query_string(&self) -> String {
        self.entries
            .iter()
            .map(|(name, value)| {
                format!(
                    "{}={}",
                    urlencoding::encode(name),
                    urlencoding::encode(value)
                )
            })
            .collect::<Vec<_>>()
            .join("&")
    }
}

impl Display for QueryParams {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_query_string())
    }
}

impl<K, V> FromIterator<(K, V)> for QueryParams
where
    K: Into<String>,
    V: ToString,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (name, value) in iter {
            params.insert(name, value);
        }
        params
    }
}
