//! SSE transport, session lifecycle, and the `axum` router that ties them to the tool
//! dispatcher (§4.9).

pub mod directory;
pub mod jsonrpc;
pub mod manager;
pub mod transport;

pub use directory::TenantDirectory;
pub use jsonrpc::{JsonRpcRequest, JsonRpcResponse};
pub use manager::{DEFAULT_CALL_DEADLINE, DEFAULT_IDLE_TIMEOUT, SessionManager, SetupRequest};
pub use transport::SseSender;

// crates.io
use axum::{
	Json, Router,
	extract::{Query, State},
	http::{HeaderMap, StatusCode},
	response::IntoResponse,
	routing::{get, post},
};
// self
use crate::{_prelude::*, http::TokenHttpClient, upstream::UpstreamHttpClient};

/// Shared state behind every HTTP route.
pub struct AppState<H, U> {
	/// The session registry and onboarding surface.
	pub sessions: Arc<SessionManager<H, U>>,
	/// Header name carrying the tenant's client id on `GET /sse` (§6).
	pub credential_header_id: String,
	/// Header name carrying the tenant's client secret on `GET /sse` (§6).
	pub credential_header_secret: String,
}

/// Query parameters accepted by `POST /message`.
#[derive(Deserialize)]
struct MessageQuery {
	session: String,
}

/// Builds the broker's `axum` router: `GET /sse`, `POST /message`, `GET /health`, and
/// `POST /oauth/setup` (§4.9).
pub fn router<H, U>(state: Arc<AppState<H, U>>) -> Router
where
	H: TokenHttpClient,
	U: UpstreamHttpClient,
{
	Router::new()
		.route("/sse", get(open_sse::<H, U>))
		.route("/message", post(post_message::<H, U>))
		.route("/health", get(health::<H, U>))
		.route("/oauth/setup", post(oauth_setup::<H, U>))
		.with_state(state)
}

async fn open_sse<H, U>(State(state): State<Arc<AppState<H, U>>>, headers: HeaderMap) -> impl IntoResponse
where
	H: TokenHttpClient,
	U: UpstreamHttpClient,
{
	let Some(client_id) = header_str(&headers, &state.credential_header_id) else {
		return Err(StatusCode::UNAUTHORIZED);
	};
	let Some(client_secret) = header_str(&headers, &state.credential_header_secret) else {
		return Err(StatusCode::UNAUTHORIZED);
	};

	let Some(tenant) = state.sessions.resolve_tenant(client_id, client_secret) else {
		return Err(StatusCode::UNAUTHORIZED);
	};

	let (_session_id, sse) = state.sessions.open_session(tenant).await;

	Ok(sse)
}

async fn post_message<H, U>(
	State(state): State<Arc<AppState<H, U>>>,
	Query(query): Query<MessageQuery>,
	Json(frame): Json<JsonRpcRequest>,
) -> StatusCode
where
	H: TokenHttpClient,
	U: UpstreamHttpClient,
{
	if state.sessions.submit_frame(&query.session, frame).await {
		StatusCode::ACCEPTED
	} else {
		StatusCode::NOT_FOUND
	}
}

async fn health<H, U>(State(state): State<Arc<AppState<H, U>>>) -> Json<serde_json::Value>
where
	H: TokenHttpClient,
	U: UpstreamHttpClient,
{
	Json(serde_json::json!({ "status": "ok", "sessions": state.sessions.session_count() }))
}

async fn oauth_setup<H, U>(
	State(state): State<Arc<AppState<H, U>>>,
	Json(request): Json<SetupRequest>,
) -> Result<StatusCode, (StatusCode, Json<serde_json::Value>)>
where
	H: TokenHttpClient,
	U: UpstreamHttpClient,
{
	state.sessions.complete_setup(request).await.map(|()| StatusCode::CREATED).map_err(|e| {
		let rpc = e.to_jsonrpc_error();

		(StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": rpc.message })))
	})
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
	headers.get(name)?.to_str().ok()
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		_preludet::{test_master_key, test_reqwest_http_client},
		auth::{TenantId, TokenSecret, tenant::{DataCenter, Tenant}},
		breaker::CircuitBreaker,
		crypto::CryptoBox,
		dispatcher::ToolDispatcher,
		http::ReqwestHttpClient,
		oauth_client::OAuthClient,
		rate::RateCoordinator,
		store::{CredentialStore, MemoryStore},
		token_manager::TokenManager,
		upstream::{ReqwestUpstreamHttpClient, UpstreamAdapter},
	};
	use axum::body::Body;
	use axum::http::Request;
	use tower::ServiceExt;

	fn state() -> Arc<AppState<ReqwestHttpClient, ReqwestUpstreamHttpClient>> {
		let store: Arc<dyn CredentialStore> = Arc::new(MemoryStore::new());
		let crypto = Arc::new(CryptoBox::new(test_master_key()));
		let rate = Arc::new(RateCoordinator::new(Default::default()));
		let breaker = Arc::new(CircuitBreaker::new(Default::default()));
		let oauth = Arc::new(OAuthClient::new(test_reqwest_http_client()));
		let token_manager = Arc::new(TokenManager::new(
			Arc::clone(&store),
			Arc::clone(&crypto),
			Arc::clone(&rate),
			Arc::clone(&breaker),
			Arc::clone(&oauth),
		));
		let adapter = Arc::new(UpstreamAdapter::new(
			token_manager,
			ReqwestUpstreamHttpClient(test_reqwest_http_client().0),
			rate,
			breaker,
		));
		let dispatcher = Arc::new(ToolDispatcher::new(adapter));
		let tenants = Arc::new(TenantDirectory::new());

		tenants.register(Tenant {
			id: TenantId::new("tenant-1").unwrap(),
			data_center: DataCenter::Us,
			base_url: Url::parse("https://sdpondemand.manageengine.com").unwrap(),
			instance: "acme".into(),
			client_id: "1000.XYZ".into(),
			client_secret: TokenSecret::new("s3cr3t"),
		});

		let sessions = Arc::new(SessionManager::new(dispatcher, tenants, store, crypto, oauth));

		Arc::new(AppState {
			sessions,
			credential_header_id: "x-sdp-client-id".into(),
			credential_header_secret: "x-sdp-client-secret".into(),
		})
	}

	#[tokio::test]
	async fn health_endpoint_reports_status_ok() {
		let app = router(state());
		let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
		let response = app.oneshot(request).await.unwrap();

		assert_eq!(response.status(), StatusCode::OK);
	}

	#[tokio::test]
	async fn sse_without_credential_headers_is_rejected() {
		let app = router(state());
		let request = Request::builder().uri("/sse").body(Body::empty()).unwrap();
		let response = app.oneshot(request).await.unwrap();

		assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
	}

	#[tokio::test]
	async fn sse_with_unknown_credentials_is_rejected() {
		let app = router(state());
		let request = Request::builder()
			.uri("/sse")
			.header("x-sdp-client-id", "nope")
			.header("x-sdp-client-secret", "nope")
			.body(Body::empty())
			.unwrap();
		let response = app.oneshot(request).await.unwrap();

		assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
	}

	#[tokio::test]
	async fn message_for_unknown_session_returns_not_found() {
		let app = router(state());
		let request = Request::builder()
			.method("POST")
			.uri("/message?session=missing")
			.header("content-type", "application/json")
			.body(Body::from(
				serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}).to_string(),
			))
			.unwrap();
		let response = app.oneshot(request).await.unwrap();

		assert_eq!(response.status(), StatusCode::NOT_FOUND);
	}
}
