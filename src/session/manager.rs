//! Session lifecycle, MCP handshake, and JSON-RPC frame routing over the SSE transport (§4.9).

// std
use std::time::Duration as StdDuration;
// crates.io
use rand::RngCore;
use tokio::sync::mpsc;
// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TenantId, TokenSecret, tenant::Tenant},
	crypto::CryptoBox,
	dispatcher::ToolDispatcher,
	error::{ConfigError, JsonRpcError},
	http::TokenHttpClient,
	oauth_client::{OAuthClient, OAuthError},
	obs::{OperationKind, OperationOutcome, OperationSpan, record_operation_outcome},
	session::{
		directory::TenantDirectory,
		jsonrpc::{JsonRpcRequest, JsonRpcResponse},
		transport::{self, SseSender},
	},
	store::CredentialStore,
	upstream::UpstreamHttpClient,
};

/// Default per-session idle timeout (§6 `SDP_BROKER_SESSION_IDLE_TIMEOUT_SECS`).
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::seconds(1800);
/// Default per-tool-call cancellation deadline (§6 `SDP_BROKER_TOOL_CALL_DEADLINE_SECS`).
pub const DEFAULT_CALL_DEADLINE: Duration = Duration::seconds(60);
/// MCP protocol version this broker negotiates.
const PROTOCOL_VERSION: &str = "2024-11-05";
/// Bound on buffered inbound frames before a session applies backpressure to `POST /message`.
const INBOUND_QUEUE_CAPACITY: usize = 64;

/// Request payload accepted by `POST /oauth/setup` (§4.9, §6).
#[derive(Clone, Debug, Deserialize)]
pub struct SetupRequest {
	/// Stable identifier the operator assigns to this tenant.
	pub tenant_id: String,
	/// OAuth client id registered with the identity provider.
	pub client_id: String,
	/// OAuth client secret registered with the identity provider.
	pub client_secret: String,
	/// Identity-provider region, e.g. `"US"`.
	pub data_center: String,
	/// SaaS base URL, e.g. `"https://sdpondemand.manageengine.com"`.
	pub base_url: String,
	/// Path segment identifying the tenant's SaaS instance.
	pub instance: String,
	/// Redirect URI registered for the authorization code grant.
	pub redirect_uri: String,
	/// One-shot authorization code from the identity provider's consent flow.
	pub code: String,
}

/// Bookkeeping the manager keeps for one live session. The inbound sender is the session's only
/// handle to its pump task: dropping it (on close or idle sweep) ends the pump's receive loop
/// and, transitively, closes the SSE stream once the pump's last [`SseSender`] clone drops.
struct SessionEntry {
	inbound: mpsc::Sender<JsonRpcRequest>,
	last_activity: Mutex<OffsetDateTime>,
}

/// Owns every live session, the tenant directory, and the collaborators needed to complete
/// onboarding (§4.9, §9: "SessionManager owns sessions; sessions hold tenant id ... and a
/// reference to TokenManager via constructor injection").
pub struct SessionManager<H, U> {
	dispatcher: Arc<ToolDispatcher<H, U>>,
	tenants: Arc<TenantDirectory>,
	store: Arc<dyn CredentialStore>,
	crypto: Arc<CryptoBox>,
	oauth: Arc<OAuthClient<H>>,
	sessions: RwLock<HashMap<String, SessionEntry>>,
	idle_timeout: Duration,
	call_deadline: Duration,
}
impl<H, U> SessionManager<H, U>
where
	H: TokenHttpClient,
	U: UpstreamHttpClient,
{
	/// Builds a manager around its collaborators, using the documented default timeouts.
	pub fn new(
		dispatcher: Arc<ToolDispatcher<H, U>>,
		tenants: Arc<TenantDirectory>,
		store: Arc<dyn CredentialStore>,
		crypto: Arc<CryptoBox>,
		oauth: Arc<OAuthClient<H>>,
	) -> Self {
		Self::with_timeouts(
			dispatcher,
			tenants,
			store,
			crypto,
			oauth,
			DEFAULT_IDLE_TIMEOUT,
			DEFAULT_CALL_DEADLINE,
		)
	}

	/// Builds a manager with explicit timeouts, for configuration-driven overrides.
	pub fn with_timeouts(
		dispatcher: Arc<ToolDispatcher<H, U>>,
		tenants: Arc<TenantDirectory>,
		store: Arc<dyn CredentialStore>,
		crypto: Arc<CryptoBox>,
		oauth: Arc<OAuthClient<H>>,
		idle_timeout: Duration,
		call_deadline: Duration,
	) -> Self {
		Self {
			dispatcher,
			tenants,
			store,
			crypto,
			oauth,
			sessions: RwLock::new(HashMap::new()),
			idle_timeout,
			call_deadline,
		}
	}

	/// Resolves a tenant from the `GET /sse` credential header pair (§6). `None` means the
	/// caller must answer HTTP 401; an unknown id and a secret mismatch must be indistinguishable
	/// to the client.
	pub fn resolve_tenant(&self, client_id: &str, client_secret: &str) -> Option<Tenant> {
		self.tenants.resolve_by_credentials(client_id, client_secret)
	}

	/// Opens a new session for an already-resolved tenant, spawning its inbound pump task and
	/// returning the session id plus the `axum` SSE response to hand back to the client.
	pub async fn open_session(
		self: &Arc<Self>,
		tenant: Tenant,
	) -> (String, axum::response::sse::Sse<transport::SseStream>) {
		record_operation_outcome(OperationKind::SessionOpen, OperationOutcome::Attempt);

		let span = OperationSpan::new(OperationKind::SessionOpen, "open_session");
		let result = span.instrument(self.open_session_inner(tenant)).await;

		record_operation_outcome(OperationKind::SessionOpen, OperationOutcome::Success);

		result
	}

	async fn open_session_inner(
		self: &Arc<Self>,
		tenant: Tenant,
	) -> (String, axum::response::sse::Sse<transport::SseStream>) {
		let session_id = new_session_id();
		let granted = self.granted_scope(&tenant.id).await;
		let (sender, sse) = transport::new_stream();
		let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);

		sender.try_send(
			"endpoint",
			&serde_json::json!({ "uri": format!("/message?session={session_id}") }),
		);

		self.sessions.write().insert(
			session_id.clone(),
			SessionEntry { inbound: inbound_tx, last_activity: Mutex::new(OffsetDateTime::now_utc()) },
		);

		let manager = Arc::clone(self);
		let pump_session_id = session_id.clone();

		tokio::spawn(async move {
			manager.pump(pump_session_id, tenant, granted, sender, inbound_rx).await;
		});

		(session_id, sse)
	}

	/// Accepts one inbound JSON-RPC frame for `session_id`, per `POST /message?session=<id>`.
	///
	/// Returns `false` when the session id is unknown or its pump has stopped accepting work,
	/// which the HTTP layer should surface as a 404.
	pub async fn submit_frame(&self, session_id: &str, frame: JsonRpcRequest) -> bool {
		let inbound = {
			let sessions = self.sessions.read();

			match sessions.get(session_id) {
				Some(entry) => {
					*entry.last_activity.lock() = OffsetDateTime::now_utc();

					entry.inbound.clone()
				},
				None => return false,
			}
		};

		inbound.send(frame).await.is_ok()
	}

	/// Closes a session immediately, ending its pump task and the SSE stream it drives.
	pub fn close_session(&self, session_id: &str) {
		self.sessions.write().remove(session_id);
	}

	/// Number of currently tracked sessions, exposed for `GET /health` and tests.
	pub fn session_count(&self) -> usize {
		self.sessions.read().len()
	}

	/// Runs one pass of the idle-timeout sweep, closing every session whose last activity is
	/// older than the configured idle timeout (§4.9, §6 `SDP_BROKER_SESSION_IDLE_TIMEOUT_SECS`).
	pub fn sweep_idle_sessions(&self) {
		let now = OffsetDateTime::now_utc();
		let expired: Vec<String> = self
			.sessions
			.read()
			.iter()
			.filter(|(_, entry)| now - *entry.last_activity.lock() > self.idle_timeout)
			.map(|(id, _)| id.clone())
			.collect();

		if !expired.is_empty() {
			tracing::info!(count = expired.len(), "closing idle sessions");
		}

		let mut sessions = self.sessions.write();

		for id in expired {
			sessions.remove(&id);
		}
	}

	/// Spawns a background task that periodically runs [`Self::sweep_idle_sessions`].
	pub fn spawn_idle_reaper(self: &Arc<Self>, interval: StdDuration) {
		let manager = Arc::clone(self);

		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(interval);

			loop {
				ticker.tick().await;
				manager.sweep_idle_sessions();
			}
		});
	}

	/// Completes initial OAuth onboarding for a tenant, per `POST /oauth/setup` (§4.9, §6).
	pub async fn complete_setup(&self, request: SetupRequest) -> Result<(), Error> {
		let tenant_id = TenantId::new(&request.tenant_id)
			.map_err(|e| Error::InvalidParams { reason: e.to_string(), fields: vec!["tenant_id".into()] })?;
		let data_center = crate::auth::tenant::DataCenter::parse(&request.data_center).ok_or_else(|| {
			Error::InvalidParams {
				reason: format!("Unknown data center tag: {}.", request.data_center),
				fields: vec!["data_center".into()],
			}
		})?;
		let base_url = Url::parse(&request.base_url).map_err(|e| Error::InvalidParams {
			reason: e.to_string(),
			fields: vec!["base_url".into()],
		})?;
		let redirect_uri = Url::parse(&request.redirect_uri).map_err(|e| Error::InvalidParams {
			reason: e.to_string(),
			fields: vec!["redirect_uri".into()],
		})?;
		let tenant = Tenant {
			id: tenant_id.clone(),
			data_center,
			base_url,
			instance: request.instance,
			client_id: request.client_id,
			client_secret: TokenSecret::new(request.client_secret),
		};

		let outcome = self.oauth.exchange_code(&tenant, &request.code, &redirect_uri).await.map_err(
			|e| match e {
				OAuthError::InvalidCode | OAuthError::InvalidClient =>
					Error::InvalidParams { reason: e.to_string(), fields: vec!["code".into()] },
				OAuthError::InvalidGrant => Error::NeedsReauth { setup_url: None },
				OAuthError::RateLimited { retry_after } => Error::RateLimited { retry_after },
				OAuthError::Transient(source) => Error::Transient(source),
			},
		)?;

		let access_blob = self
			.crypto
			.encrypt(&tenant_id, outcome.access_token.expose().as_bytes())
			.map_err(Error::Crypto)?;
		let refresh_blob = self
			.crypto
			.encrypt(&tenant_id, outcome.refresh_token.expose().as_bytes())
			.map_err(Error::Crypto)?;
		let record = crate::auth::CredentialRecord::builder(tenant_id)
			.access_token(access_blob, outcome.expires_at)
			.refresh_token(refresh_blob)
			.scope(outcome.scope)
			.build()
			.map_err(|_| Error::Config(ConfigError::MissingRefreshToken))?;

		self.store.upsert(record).await?;
		self.tenants.register(tenant);

		Ok(())
	}

	async fn granted_scope(&self, tenant_id: &TenantId) -> ScopeSet {
		self.store.get(tenant_id).await.ok().flatten().map(|record| record.scope).unwrap_or_default()
	}

	async fn pump(
		&self,
		session_id: String,
		tenant: Tenant,
		granted: ScopeSet,
		sse: SseSender,
		mut inbound: mpsc::Receiver<JsonRpcRequest>,
	) {
		while let Some(request) = inbound.recv().await {
			let id = request.id.clone().unwrap_or(serde_json::Value::Null);
			let deadline = StdDuration::from_secs(self.call_deadline.whole_seconds().max(0) as u64);
			let response = match tokio::time::timeout(
				deadline,
				self.handle_frame(&tenant, &granted, request),
			)
			.await
			{
				Ok(response) => response,
				Err(_) => JsonRpcResponse::error(
					id,
					JsonRpcError { code: -32000, message: "Tool call deadline exceeded.".into(), data: None },
				),
			};

			if !sse.send("message", &serde_json::to_value(&response).unwrap_or(serde_json::Value::Null)).await {
				tracing::debug!(session_id, "session stream closed, stopping pump");

				break;
			}
		}
	}

	async fn handle_frame(
		&self,
		tenant: &Tenant,
		granted: &ScopeSet,
		request: JsonRpcRequest,
	) -> JsonRpcResponse {
		let id = request.id.clone().unwrap_or(serde_json::Value::Null);

		match request.method.as_str() {
			"initialize" => JsonRpcResponse::success(
				id,
				serde_json::json!({
					"protocolVersion": PROTOCOL_VERSION,
					"serverInfo": { "name": "sdp-mcp-broker", "version": env!("CARGO_PKG_VERSION") },
					"capabilities": { "tools": {} },
				}),
			),
			"ping" => JsonRpcResponse::success(id, serde_json::json!({})),
			"tools/list" =>
				JsonRpcResponse::success(id, serde_json::json!({ "tools": self.dispatcher.list_tools(granted) })),
			"tools/call" => {
				let Some(name) = request.params["name"].as_str() else {
					return JsonRpcResponse::error(
						id,
						Error::InvalidParams { reason: "Missing tool name.".into(), fields: vec!["name".into()] }
							.to_jsonrpc_error(),
					);
				};
				let arguments = request.params["arguments"].clone();

				match self.dispatcher.call_tool(name, arguments, tenant, granted).await {
					Ok(content) => JsonRpcResponse::success(
						id,
						serde_json::json!({ "content": content, "isError": false }),
					),
					Err(e) => JsonRpcResponse::error(id, e.to_jsonrpc_error()),
				}
			},
			other => JsonRpcResponse::method_not_found(id, other),
		}
	}
}

fn new_session_id() -> String {
	let mut bytes = [0_u8; 16];

	rand::rng().fill_bytes(&mut bytes);

	base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, &bytes)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		_preludet::{test_master_key, test_reqwest_http_client},
		breaker::CircuitBreaker,
		http::ReqwestHttpClient,
		rate::RateCoordinator,
		store::MemoryStore,
		token_manager::TokenManager,
		upstream::{ReqwestUpstreamHttpClient, UpstreamAdapter},
	};

	fn manager() -> Arc<SessionManager<ReqwestHttpClient, ReqwestUpstreamHttpClient>> {
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

		Arc::new(SessionManager::new(dispatcher, tenants, store, crypto, oauth))
	}

	fn tenant() -> Tenant {
		Tenant {
			id: TenantId::new("tenant-1").unwrap(),
			data_center: crate::auth::tenant::DataCenter::Us,
			base_url: Url::parse("https://sdpondemand.manageengine.com").unwrap(),
			instance: "acme".into(),
			client_id: "1000.XYZ".into(),
			client_secret: TokenSecret::new("s3cr3t"),
		}
	}

	#[tokio::test]
	async fn open_session_registers_a_pump_and_accepts_frames() {
		let manager = manager();
		let (session_id, sse) = manager.open_session(tenant()).await;

		assert_eq!(manager.session_count(), 1);

		let accepted = manager
			.submit_frame(
				&session_id,
				JsonRpcRequest {
					jsonrpc: "2.0".into(),
					id: Some(serde_json::json!(1)),
					method: "ping".into(),
					params: serde_json::Value::Null,
				},
			)
			.await;

		assert!(accepted);

		drop(sse);
	}

	#[tokio::test]
	async fn submit_frame_rejects_unknown_session_ids() {
		let manager = manager();
		let accepted = manager
			.submit_frame(
				"does-not-exist",
				JsonRpcRequest {
					jsonrpc: "2.0".into(),
					id: Some(serde_json::json!(1)),
					method: "ping".into(),
					params: serde_json::Value::Null,
				},
			)
			.await;

		assert!(!accepted);
	}

	#[tokio::test]
	async fn close_session_removes_it_from_the_registry() {
		let manager = manager();
		let (session_id, sse) = manager.open_session(tenant()).await;

		manager.close_session(&session_id);

		assert_eq!(manager.session_count(), 0);

		drop(sse);
	}

	#[test]
	fn session_ids_are_url_safe_and_reasonably_unique() {
		let a = new_session_id();
		let b = new_session_id();

		assert_ne!(a, b);
		assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
	}
}
