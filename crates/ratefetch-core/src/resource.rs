//! Upstream collection descriptions and response envelope parsing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FetchError;

/// One fetched record. Its content is never interpreted beyond the identifier.
pub type Record = Value;

/// Envelope layout of an upstream collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeShape {
    /// HAL-style CRM envelope: `{"_embedded": {"leads": [...]}, "_links": {"next": ...}}`.
    Embedded,
    /// Graph-style ads envelope: `{"data": [...], "paging": {"next": ...}}`.
    Graph,
}

/// How a collection is walked past its first page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Paging {
    /// `page=N&limit=M`: every page can be requested directly, so pages after
    /// the first are fetched concurrently.
    PageNumber,
    /// Opaque cursor read from `cursor_pointer` and sent back as
    /// `cursor_param`: pages can only be fetched one after another.
    Cursor {
        cursor_pointer: String,
        cursor_param: String,
    },
}

/// Description of one upstream collection endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Path relative to the API base url, e.g. `leads`.
    pub path: String,
    /// JSON pointer to the record array.
    pub records_pointer: String,
    /// JSON pointer to the total-count field, when the upstream reports one.
    pub total_pointer: Option<String>,
    /// JSON pointer whose presence means another page exists.
    pub next_pointer: Option<String>,
    /// Record field used for deduplication and batch lookups.
    pub id_field: String,
    /// Query parameter accepting a comma-separated id list.
    pub batch_filter_param: Option<String>,
    pub paging: Paging,
}

impl Resource {
    /// CRM collection `name` at path `name` (`/_embedded/<name>`).
    pub fn embedded(name: &str) -> Self {
        Self::embedded_at(name, name)
    }

    /// CRM collection whose path differs from its embedded key,
    /// e.g. `embedded_at("leads/pipelines", "pipelines")`.
    pub fn embedded_at(path: &str, embedded_key: &str) -> Self {
        Self {
            path: path.trim_matches('/').to_owned(),
            records_pointer: format!("/_embedded/{embedded_key}"),
            total_pointer: Some(String::from("/_total_items")),
            next_pointer: Some(String::from("/_links/next")),
            id_field: String::from("id"),
            batch_filter_param: Some(String::from("filter[id]")),
            paging: Paging::PageNumber,
        }
    }

    /// Ads-API edge at `path`: `/data` records, no total, walked with the
    /// `after` cursor while `/paging/next` is present.
    pub fn graph(path: &str) -> Self {
        Self {
            path: path.trim_matches('/').to_owned(),
            records_pointer: String::from("/data"),
            total_pointer: None,
            next_pointer: Some(String::from("/paging/next")),
            id_field: String::from("id"),
            batch_filter_param: Some(String::from("ids")),
            paging: Paging::Cursor {
                cursor_pointer: String::from("/paging/cursors/after"),
                cursor_param: String::from("after"),
            },
        }
    }

    pub fn with_shape(path: &str, shape: EnvelopeShape) -> Self {
        match shape {
            EnvelopeShape::Embedded => {
                let key = path.trim_matches('/').rsplit('/').next().unwrap_or(path);
                Self::embedded_at(path, key)
            }
            EnvelopeShape::Graph => Self::graph(path),
        }
    }

    pub fn without_total(mut self) -> Self {
        self.total_pointer = None;
        self
    }

    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    /// Query parameters the paginator sets itself; callers may not pass them.
    pub fn paging_params(&self) -> Vec<&str> {
        let mut names = vec!["limit"];
        match &self.paging {
            Paging::PageNumber => names.push("page"),
            Paging::Cursor { cursor_param, .. } => names.push(cursor_param.as_str()),
        }
        names
    }

    /// Path of a single entity of this collection.
    pub fn entity_path(&self, id: &str) -> String {
        format!("{}/{id}", self.path)
    }

    /// Parses one page payload.
    ///
    /// An empty body (the CRM answers 204 when nothing matches) and a missing
    /// record array both mean "no records".
    pub fn parse_page(&self, body: &str) -> Result<PageEnvelope, FetchError> {
        if body.trim().is_empty() {
            return Ok(PageEnvelope::default());
        }

        let document: Value = serde_json::from_str(body)
            .map_err(|error| FetchError::decode(format!("{}: invalid json: {error}", self.path)))?;

        let records = match document.pointer(&self.records_pointer) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(_) => {
                return Err(FetchError::decode(format!(
                    "{}: '{}' is not an array",
                    self.path, self.records_pointer
                )))
            }
        };

        let total = self
            .total_pointer
            .as_deref()
            .and_then(|pointer| document.pointer(pointer))
            .and_then(json_count);

        let has_next = self.next_pointer.as_deref().map(|pointer| {
            document
                .pointer(pointer)
                .is_some_and(|value| !value.is_null())
        });

        let next_cursor = match &self.paging {
            Paging::Cursor { cursor_pointer, .. } if has_next != Some(false) => document
                .pointer(cursor_pointer)
                .and_then(Value::as_str)
                .map(str::to_owned),
            _ => None,
        };

        Ok(PageEnvelope {
            records,
            total,
            has_next,
            next_cursor,
        })
    }

    /// Parses a single-entity payload; an empty body means "not found".
    pub fn parse_entity(&self, body: &str) -> Result<Option<Record>, FetchError> {
        if body.trim().is_empty() {
            return Ok(None);
        }
        let record: Value = serde_json::from_str(body)
            .map_err(|error| FetchError::decode(format!("{}: invalid json: {error}", self.path)))?;
        Ok(Some(record))
    }

    /// Identifier of `record`, rendered as a string, when present.
    pub fn record_id(&self, record: &Record) -> Option<String> {
        match record.get(&self.id_field)? {
            Value::String(id) => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }
}

fn json_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Records and pagination metadata of one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageEnvelope {
    pub records: Vec<Record>,
    pub total: Option<u64>,
    /// `Some(false)` when a next-link pointer is configured and absent.
    pub has_next: Option<bool>,
    /// Cursor for the following page of a cursor-paged collection.
    pub next_cursor: Option<String>,
}

impl PageEnvelope {
    /// Whether records may follow this page of a page-numbered walk: it came
    /// back full and the upstream did not rule out a next page.
    pub fn continues(&self, page_size: u32) -> bool {
        self.records.len() as u64 >= u64::from(page_size.max(1)) && self.has_next != Some(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn embedded_page_exposes_records_total_and_next_link() {
        let resource = Resource::embedded("leads");
        let body = json!({
            "_page": 1,
            "_total_items": 600,
            "_links": {"next": {"href": "https://crm.example.test/api/v4/leads?page=2"}},
            "_embedded": {"leads": [{"id": 1}, {"id": 2}]}
        })
        .to_string();

        let page = resource.parse_page(&body).expect("valid page");

        assert_eq!(page.records.len(), 2);
        assert_eq!(page.total, Some(600));
        assert_eq!(page.has_next, Some(true));
    }

    #[test]
    fn empty_body_is_an_empty_page() {
        let page = Resource::embedded("leads").parse_page("").expect("204 body");

        assert!(page.records.is_empty());
        assert_eq!(page.total, None);
    }

    #[test]
    fn graph_page_without_next_cursor_reports_last_page() {
        let resource = Resource::graph("act_1/campaigns");
        let body = json!({"data": [{"id": "c1"}], "paging": {"cursors": {}}}).to_string();

        let page = resource.parse_page(&body).expect("valid page");

        assert_eq!(page.records.len(), 1);
        assert_eq!(page.has_next, Some(false));
        assert_eq!(page.next_cursor, None);
    }

    #[test]
    fn graph_page_with_next_link_exposes_the_after_cursor() {
        let resource = Resource::graph("act_1/campaigns");
        let body = json!({
            "data": [{"id": "c1"}],
            "paging": {"cursors": {"before": "QVFI", "after": "QVFJ"}, "next": "https://graph.example.test/next"}
        })
        .to_string();

        let page = resource.parse_page(&body).expect("valid page");

        assert_eq!(page.has_next, Some(true));
        assert_eq!(page.next_cursor.as_deref(), Some("QVFJ"));
    }

    #[test]
    fn embedded_pages_never_carry_a_cursor() {
        let body = json!({
            "_links": {"next": {"href": "https://crm.example.test/api/v4/leads?page=2"}},
            "_embedded": {"leads": [{"id": 1}]}
        })
        .to_string();

        let page = Resource::embedded("leads").parse_page(&body).expect("valid page");

        assert_eq!(page.next_cursor, None);
        assert!(page.continues(1));
        assert!(!page.continues(250));
    }

    #[test]
    fn page_continues_only_when_full_and_not_the_last() {
        let mut resource = Resource::embedded("leads");
        resource.next_pointer = None;
        let body = json!({"_embedded": {"leads": [{"id": 1}, {"id": 2}]}}).to_string();

        let page = resource.parse_page(&body).expect("valid page");

        assert_eq!(page.has_next, None);
        assert!(page.continues(2));
        assert!(!page.continues(3));

        let last = Resource::embedded("leads").parse_page(&body).expect("valid page");
        assert_eq!(last.has_next, Some(false));
        assert!(!last.continues(2));
    }

    #[test]
    fn paging_params_depend_on_the_paging_style() {
        assert_eq!(Resource::embedded("leads").paging_params(), vec!["limit", "page"]);
        assert_eq!(Resource::graph("act_1/ads").paging_params(), vec!["limit", "after"]);
    }

    #[test]
    fn non_array_records_are_a_decode_error() {
        let body = json!({"_embedded": {"leads": {"id": 1}}}).to_string();

        let error = Resource::embedded("leads")
            .parse_page(&body)
            .expect_err("object is not a record list");

        assert_eq!(error.kind(), crate::error::FetchErrorKind::Decode);
    }

    #[test]
    fn record_ids_accept_numbers_and_strings() {
        let resource = Resource::embedded("leads");

        assert_eq!(resource.record_id(&json!({"id": 42})), Some("42".to_owned()));
        assert_eq!(resource.record_id(&json!({"id": "abc"})), Some("abc".to_owned()));
        assert_eq!(resource.record_id(&json!({"name": "no id"})), None);
    }

    #[test]
    fn shape_derives_embedded_key_from_last_segment() {
        let resource = Resource::with_shape("leads/pipelines", EnvelopeShape::Embedded);

        assert_eq!(resource.path, "leads/pipelines");
        assert_eq!(resource.records_pointer, "/_embedded/pipelines");
        assert_eq!(resource.entity_path("7"), "leads/pipelines/7");
    }

    #[test]
    fn string_totals_are_parsed() {
        let body = json!({"_total_items": "251", "_embedded": {"leads": []}}).to_string();

        let page = Resource::embedded("leads").parse_page(&body).expect("valid");

        assert_eq!(page.total, Some(251));
    }
}
