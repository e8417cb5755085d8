#![cfg(feature = "reqwest")]

//! Close-request retry, search round-trip, and requester-reply scenarios (S4, S5, S6).

// std
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};
// crates.io
use httpmock::prelude::*;
use sdp_mcp_broker::{
    auth::{CredentialRecord, DataCenter, ScopeSet, TenantId, TokenSecret, tenant::Tenant},
    breaker::{BreakerThresholds, CircuitBreaker},
    crypto::{CryptoBox, MasterKey},
    dispatcher::ToolDispatcher,
    error::Error,
    oauth_client::OAuthClient,
    rate::{RateCoordinator, RateThresholds},
    store::{CredentialStore, MemoryStore},
    token_manager::TokenManager,
    upstream::{ClosureInfo, UpstreamAdapter, UpstreamHttpClient, UpstreamRequest, UpstreamResponse},
};
use time::OffsetDateTime;
use url::Url;

mod support;
use support::{FakeOAuthResponse, FakeOAuthTransport};

fn granted_scopes() -> ScopeSet {
    ScopeSet::new(["requests:read", "requests:write"]).unwrap()
}

/// Extracts and parses the JSON text of a tool call's first content item.
fn first_result(content: Vec<sdp_mcp_broker::dispatcher::ToolContent>) -> serde_json::Value {
    let value = serde_json::to_value(&content[0]).unwrap();
    let text = value["text"].as_str().unwrap();

    serde_json::from_str(text).unwrap()
}

fn tenant_against(base_url: &str) -> Tenant {
    Tenant {
        id: TenantId::new("tenant-upstream").unwrap(),
        data_center: DataCenter::Us,
        base_url: Url::parse(base_url).unwrap(),
        instance: "itdesk".into(),
        client_id: "client-id".into(),
        client_secret: TokenSecret::new("client-secret"),
    }
}

async fn seed_fresh_token(store: &Arc<dyn CredentialStore>, crypto: &Arc<CryptoBox>, tenant: &Tenant) {
    let access = crypto.encrypt(&tenant.id, b"already-fresh-access-token").unwrap();
    let refresh = crypto.encrypt(&tenant.id, b"refresh-token").unwrap();
    let now = OffsetDateTime::now_utc();
    let record = CredentialRecord::builder(tenant.id.clone())
        .refresh_token(refresh)
        .access_token(access, now + time::Duration::seconds(3600))
        .build()
        .unwrap();

    store.upsert(record).await.unwrap();
}

/// Returns canned responses in order regardless of request content, used to exercise
/// `close_request`'s one-retry-on-missing-closure_code path without a real HTTP round trip.
#[derive(Clone, Default)]
struct SequencedTransport(Arc<Mutex<VecDeque<UpstreamResponse>>>);
impl SequencedTransport {
    fn new(responses: Vec<UpstreamResponse>) -> Self {
        Self(Arc::new(Mutex::new(responses.into())))
    }
}
impl UpstreamHttpClient for SequencedTransport {
    type Error = std::io::Error;

    fn execute(
        &self,
        _request: UpstreamRequest,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<UpstreamResponse, Self::Error>> + Send + '_>>
    {
        let next = self.0.lock().unwrap().pop_front();

        Box::pin(async move {
            next.ok_or_else(|| std::io::Error::other("SequencedTransport ran out of canned responses."))
        })
    }
}

fn json_response(status: u16, body: serde_json::Value) -> UpstreamResponse {
    UpstreamResponse { status, body: serde_json::to_vec(&body).unwrap() }
}

async fn build_adapter_with_transport<U: UpstreamHttpClient>(
    transport: U,
    tenant: &Tenant,
) -> Arc<UpstreamAdapter<FakeOAuthTransport, U>> {
    let crypto_box = Arc::new(CryptoBox::new(MasterKey::from_bytes(&[9_u8; 32]).unwrap()));
    let store: Arc<dyn CredentialStore> = Arc::new(MemoryStore::new());

    seed_fresh_token(&store, &crypto_box, tenant).await;

    let rate = Arc::new(RateCoordinator::new(RateThresholds::default()));
    let breaker = Arc::new(CircuitBreaker::new(BreakerThresholds::default()));
    let oauth = Arc::new(OAuthClient::new(FakeOAuthTransport::new(FakeOAuthResponse::refresh_success())));
    let token_manager = Arc::new(TokenManager::new(store, crypto_box, Arc::clone(&rate), Arc::clone(&breaker), oauth));

    Arc::new(UpstreamAdapter::new(token_manager, transport, rate, breaker))
}

#[tokio::test]
async fn close_request_retries_once_with_the_cached_default_closure_code() {
    let tenant = tenant_against("https://sdpondemand.manageengine.com");
    let transport = SequencedTransport::new(vec![
        json_response(
            400,
            serde_json::json!({
                "response_status": {
                    "status_code": 4012,
                    "messages": [{"message": "Mandatory field missing.", "field": "closure_code"}],
                },
            }),
        ),
        json_response(
            200,
            serde_json::json!({
                "response_status": {"status_code": 2000},
                "request": {"id": "501", "status": {"name": "Closed"}},
            }),
        ),
    ]);
    let adapter = build_adapter_with_transport(transport, &tenant).await;

    adapter.metadata().put(
        &tenant.id,
        "closure_code",
        serde_json::json!([{"id": "900", "name": "Resolved", "is_active": true}]),
        OffsetDateTime::now_utc(),
    );

    let result = adapter
        .close_request(&tenant, "501", ClosureInfo::new("Resolved by rebooting."))
        .await
        .expect("retry with the cached default closure code should succeed");

    assert_eq!(result["request"]["id"], "501");
}

#[tokio::test]
async fn close_request_without_a_cached_default_surfaces_validation_error() {
    let tenant = tenant_against("https://sdpondemand.manageengine.com");
    let transport = SequencedTransport::new(vec![json_response(
        400,
        serde_json::json!({
            "response_status": {
                "status_code": 4012,
                "messages": [{"message": "Mandatory field missing.", "field": "closure_code"}],
            },
        }),
    )]);
    let adapter = build_adapter_with_transport(transport, &tenant).await;

    let err = adapter.close_request(&tenant, "999", ClosureInfo::new("Done.")).await.unwrap_err();

    assert!(matches!(err, Error::UpstreamValidation { ref fields, .. } if fields.iter().any(|f| f == "closure_code")));
}

#[tokio::test]
async fn search_requests_tool_round_trips_through_the_upstream() {
    let server = MockServer::start_async().await;
    let tenant = tenant_against(&server.base_url());
    let dispatcher = ToolDispatcher::new(
        build_adapter_with_transport(sdp_mcp_broker::upstream::ReqwestUpstreamHttpClient::default(), &tenant).await,
    );

    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/app/itdesk/api/v3/requests")
                .query_param_exists("input_data")
                .header("authorization", "Zoho-oauthtoken already-fresh-access-token");
            then.status(200).header("content-type", "application/json").json_body(serde_json::json!({
                "response_status": {"status_code": 2000},
                "requests": [{"id": "1", "subject": "Printer jam"}],
            }));
        })
        .await;

    let args = serde_json::json!({
        "criteria": [
            {"field": "status.name", "condition": "is", "value": "Open"},
            {"field": "priority.name", "condition": "is", "value": "High"},
        ],
    });

    let content = dispatcher
        .call_tool("search_requests", args, &tenant, &granted_scopes())
        .await
        .expect("search_requests should reach the upstream and succeed");
    let result = first_result(content);

    assert_eq!(result["requests"][0]["id"], "1");
    mock.assert_async().await;
}

#[tokio::test]
async fn search_requests_with_no_criteria_still_reaches_the_upstream() {
    let server = MockServer::start_async().await;
    let tenant = tenant_against(&server.base_url());
    let dispatcher = ToolDispatcher::new(
        build_adapter_with_transport(sdp_mcp_broker::upstream::ReqwestUpstreamHttpClient::default(), &tenant).await,
    );

    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/app/itdesk/api/v3/requests");
            then.status(200).json_body(serde_json::json!({
                "response_status": {"status_code": 2000},
                "requests": [],
            }));
        })
        .await;

    let content = dispatcher
        .call_tool("search_requests", serde_json::json!({}), &tenant, &granted_scopes())
        .await
        .expect("search_requests with no criteria should still succeed");
    let result = first_result(content);

    assert_eq!(result["requests"].as_array().unwrap().len(), 0);
    mock.assert_async().await;
}

#[tokio::test]
async fn reply_to_requester_tool_marks_the_note_visible_and_first_response() {
    let server = MockServer::start_async().await;
    let tenant = tenant_against(&server.base_url());
    let dispatcher = ToolDispatcher::new(
        build_adapter_with_transport(sdp_mcp_broker::upstream::ReqwestUpstreamHttpClient::default(), &tenant).await,
    );

    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/app/itdesk/api/v3/requests/501/notes")
                .body_includes("show_to_requester")
                .body_includes("mark_first_response");
            then.status(200).json_body(serde_json::json!({
                "response_status": {"status_code": 2000},
                "request_note": {"id": "note-1", "email_sent": true},
            }));
        })
        .await;

    let args = serde_json::json!({
        "request_id": "501",
        "reply_message": "We are looking into the printer jam now.",
        "mark_first_response": true,
    });

    let content = dispatcher
        .call_tool("reply_to_requester", args, &tenant, &granted_scopes())
        .await
        .expect("reply_to_requester should post a visible, first-response note");
    let result = first_result(content);

    assert_eq!(result["request_note"]["email_sent"], true);
    mock.assert_async().await;
}
