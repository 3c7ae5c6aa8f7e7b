//! Contract tests for the wire format exchanged with upstream APIs.
//!
//! Payloads mirror the documented CRM and ads API envelopes; requests are
//! checked for the headers and query parameters those APIs require.

#[path = "../support/mod.rs"]
mod support;

use std::sync::Arc;

use ratefetch_core::{
    ApiTarget, EnvelopeShape, HttpAuth, HttpResponse, QueryParams, Resource,
};
use serde_json::json;

use support::{client, Collection, FakeUpstream, BASE_URL};

const CRM_LEADS_PAGE: &str = r#"{
    "_page": 1,
    "_total_items": 2,
    "_links": {"self": {"href": "https://crm.example.test/api/v4/leads?page=1&limit=250"}},
    "_embedded": {
        "leads": [
            {"id": 19619, "name": "Deal #19619", "price": 46333, "pipeline_id": 3104455,
             "_embedded": {"contacts": [{"id": 7143599, "is_main": true}]}},
            {"id": 14460, "name": "Deal #14460", "price": 0, "pipeline_id": 3104455,
             "_embedded": {"contacts": []}}
        ]
    }
}"#;

const ADS_CAMPAIGNS_PAGE: &str = r#"{
    "data": [
        {"id": "23851234567890123", "name": "Spring", "status": "ACTIVE"},
        {"id": "23851234567890124", "name": "Summer", "status": "PAUSED"}
    ],
    "paging": {"cursors": {"before": "QVFI", "after": "QVFJ"}}
}"#;

#[test]
fn crm_page_exposes_records_and_total() {
    let page = Resource::embedded("leads")
        .parse_page(CRM_LEADS_PAGE)
        .expect("documented envelope parses");

    assert_eq!(page.records.len(), 2);
    assert_eq!(page.total, Some(2));
    assert_eq!(page.has_next, Some(false));
    assert_eq!(page.records[0]["_embedded"]["contacts"][0]["id"], json!(7143599));
}

#[test]
fn ads_page_without_next_cursor_is_the_last_page() {
    let resource = Resource::with_shape("act_1/campaigns", EnvelopeShape::Graph);

    let page = resource
        .parse_page(ADS_CAMPAIGNS_PAGE)
        .expect("documented envelope parses");

    assert_eq!(page.records.len(), 2);
    assert_eq!(page.total, None);
    assert_eq!(page.has_next, Some(false));
    assert_eq!(page.next_cursor, None);
    assert_eq!(
        resource.record_id(&page.records[1]),
        Some(String::from("23851234567890124"))
    );
}

#[test]
fn requests_carry_bearer_token_and_json_accept_header() {
    let target = ApiTarget::new(BASE_URL).with_auth(HttpAuth::BearerToken(String::from("abc")));

    let request = target.request(
        "leads",
        &QueryParams::new().with("filter[pipeline_id]", 3104455).for_page(2, 250),
    );

    assert_eq!(
        request.url,
        format!("{BASE_URL}/leads?filter%5Bpipeline_id%5D=3104455&limit=250&page=2")
    );
    assert_eq!(
        request.headers.get("authorization").map(String::as_str),
        Some("Bearer abc")
    );
    assert_eq!(
        request.headers.get("accept").map(String::as_str),
        Some("application/json")
    );
}

#[tokio::test]
async fn fetch_job_sends_page_and_limit_on_every_request() {
    let upstream = Collection::leads(25).upstream();
    let client = client(upstream.clone(), 10);

    client
        .fetch_all(&Resource::embedded("leads"), &QueryParams::new())
        .await
        .expect("discovery succeeds");

    let mut pages = upstream
        .requests()
        .iter()
        .map(|request| {
            assert_eq!(request.path, "leads");
            assert_eq!(request.param("limit"), Some("10"));
            assert_eq!(
                request.headers.get("authorization").map(String::as_str),
                Some("Bearer test-token")
            );
            request.page().expect("page parameter")
        })
        .collect::<Vec<_>>();
    pages.sort_unstable();
    assert_eq!(pages, vec![1, 2, 3]);
}

#[tokio::test]
async fn batch_lookup_uses_the_resource_filter_parameter() {
    let upstream = Arc::new(FakeUpstream::new(|request| {
        Ok(HttpResponse::ok_json(
            json!({
                "data": request
                    .param("ids")
                    .unwrap_or_default()
                    .split(',')
                    .map(|id| json!({ "id": id }))
                    .collect::<Vec<_>>()
            })
            .to_string(),
        ))
    }));
    let client = client(upstream.clone(), 100);

    let outcome = client
        .fetch_by_ids(&Resource::graph("act_1/campaigns"), ["c2", "c1"])
        .await;

    assert_eq!(outcome.records, vec![json!({"id": "c1"}), json!({"id": "c2"})]);
    let requests = upstream.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, "act_1/campaigns");
    assert_eq!(requests[0].param("ids"), Some("c1,c2"));
    assert_eq!(requests[0].param("limit"), Some("2"));
}
