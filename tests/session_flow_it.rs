#![cfg(feature = "reqwest")]

//! End-to-end onboarding and session scenarios (S1).

// std
use std::sync::Arc;
// crates.io
use sdp_mcp_broker::{
	auth::TenantId,
	breaker::CircuitBreaker,
	crypto::CryptoBox,
	dispatcher::ToolDispatcher,
	oauth_client::OAuthClient,
	rate::RateCoordinator,
	session::{JsonRpcRequest, SessionManager, SetupRequest},
	store::{CredentialStore, MemoryStore},
	token_manager::TokenManager,
	upstream::{ReqwestUpstreamHttpClient, UpstreamAdapter},
};
// self
mod support;
use support::{FakeOAuthResponse, FakeOAuthTransport};

fn build_manager(
	oauth_response: FakeOAuthResponse,
) -> Arc<SessionManager<FakeOAuthTransport, ReqwestUpstreamHttpClient>> {
	let store: Arc<dyn CredentialStore> = Arc::new(MemoryStore::new());
	let crypto = Arc::new(CryptoBox::new(
		sdp_mcp_broker::crypto::MasterKey::from_bytes(&[0x11_u8; 32]).unwrap(),
	));
	let rate = Arc::new(RateCoordinator::new(Default::default()));
	let breaker = Arc::new(CircuitBreaker::new(Default::default()));
	let oauth = Arc::new(OAuthClient::new(FakeOAuthTransport::new(oauth_response)));
	let token_manager = Arc::new(TokenManager::new(
		Arc::clone(&store),
		Arc::clone(&crypto),
		Arc::clone(&rate),
		Arc::clone(&breaker),
		Arc::clone(&oauth),
	));
	let adapter = Arc::new(UpstreamAdapter::new(
		token_manager,
		ReqwestUpstreamHttpClient::default(),
		rate,
		breaker,
	));
	let dispatcher = Arc::new(ToolDispatcher::new(adapter));
	let tenants = Arc::new(sdp_mcp_broker::session::TenantDirectory::new());

	Arc::new(SessionManager::new(dispatcher, tenants, store, crypto, oauth))
}

fn setup_request() -> SetupRequest {
	SetupRequest {
		tenant_id: "tenant-setup".into(),
		client_id: "1000.XYZ".into(),
		client_secret: "ABC".into(),
		data_center: "US".into(),
		base_url: "https://sdpondemand.manageengine.com".into(),
		instance: "acme".into(),
		redirect_uri: "https://broker.example.com/oauth/callback".into(),
		code: "one-shot-code".into(),
	}
}

#[tokio::test]
async fn initial_setup_then_session_open_and_tools_list() {
	let manager = build_manager(FakeOAuthResponse::exchange_success());

	manager.complete_setup(setup_request()).await.expect("Setup should complete against the fake identity provider.");

	let tenant =
		manager.resolve_tenant("1000.XYZ", "ABC").expect("Tenant should resolve by its onboarded credentials.");

	assert_eq!(tenant.id, TenantId::new("tenant-setup").unwrap());

	let (session_id, sse) = manager.open_session(tenant).await;

	assert_eq!(manager.session_count(), 1);

	let accepted = manager
		.submit_frame(
			&session_id,
			JsonRpcRequest {
				jsonrpc: "2.0".into(),
				id: Some(serde_json::json!(1)),
				method: "tools/list".into(),
				params: serde_json::Value::Null,
			},
		)
		.await;

	assert!(accepted);

	manager.close_session(&session_id);

	let response = axum::response::IntoResponse::into_response(sse);
	let body = axum::body::to_bytes(response.into_body(), usize::MAX)
		.await
		.expect("SSE body should drain once the pump task exits.");
	let text = String::from_utf8(body.to_vec()).expect("SSE frames are UTF-8.");

	assert!(text.contains("endpoint"));
	assert!(text.contains("message"));
	assert!(text.contains("list_requests"));
	assert!(text.contains("search_requests"));
}

#[tokio::test]
async fn setup_with_wrong_code_does_not_register_a_tenant() {
	let manager = build_manager(FakeOAuthResponse::invalid_grant());

	let err = manager.complete_setup(setup_request()).await.unwrap_err();

	assert!(matches!(err, sdp_mcp_broker::error::Error::NeedsReauth { .. }));
	assert!(manager.resolve_tenant("1000.XYZ", "ABC").is_none());
}

#[tokio::test]
async fn sse_session_rejects_mismatched_client_secret() {
	let manager = build_manager(FakeOAuthResponse::exchange_success());

	manager.complete_setup(setup_request()).await.unwrap();

	assert!(manager.resolve_tenant("1000.XYZ", "wrong-secret").is_none());
	assert!(manager.resolve_tenant("unknown-client", "ABC").is_none());
}
