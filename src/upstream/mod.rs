//! Typed operations against the SaaS REST API: request/note/metadata calls, `input_data`
//! encoding, response classification, and the one-retry-on-401 rule (§4.7).

pub mod criteria;
pub mod metadata;
pub mod requests;

pub use criteria::{Condition, CriteriaValue, LogicalOperator, SearchCriteria};
pub use metadata::MetadataCache;
pub use requests::{ClosureInfo, CreateRequestFields, NoteFields, Reference, UpdateRequestFields};

// crates.io
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
// self
use crate::{
	_prelude::*,
	auth::{TokenSecret, tenant::Tenant},
	breaker::{Admission, BreakerTarget, CircuitBreaker},
	http::TokenHttpClient,
	obs::{OperationKind, OperationOutcome, OperationSpan, record_operation_outcome},
	rate::{Grant, RateCoordinator},
	token_manager::{TokenManager, TokenManagerError},
};

const QUERY_FRAGMENT: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'<').add(b'>').add(b'`').add(b'&').add(b'=');

/// HTTP verb for one upstream request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpstreamMethod {
	/// `GET`
	Get,
	/// `POST`
	Post,
	/// `PUT`
	Put,
	/// `DELETE`
	Delete,
}

/// One fully constructed outbound REST request, transport-agnostic.
#[derive(Clone, Debug)]
pub struct UpstreamRequest {
	/// HTTP verb.
	pub method: UpstreamMethod,
	/// Absolute URL, including the `input_data` query parameter for `GET`/`DELETE`.
	pub url: Url,
	/// Bearer token in the upstream's non-standard `Zoho-oauthtoken` scheme.
	pub access_token: TokenSecret,
	/// `application/x-www-form-urlencoded` body carrying `input_data`, for `POST`/`PUT`.
	pub form_body: Option<String>,
}

/// Raw response returned by an [`UpstreamHttpClient`] implementation.
#[derive(Clone, Debug)]
pub struct UpstreamResponse {
	/// HTTP status code.
	pub status: u16,
	/// Raw response body bytes.
	pub body: Vec<u8>,
}

/// Abstraction over the HTTP transport used for SaaS REST calls, injectable the same way
/// [`TokenHttpClient`] is for OAuth exchanges so tests can swap in a mock transport.
pub trait UpstreamHttpClient
where
	Self: 'static + Send + Sync,
{
	/// Concrete error emitted by the underlying transport.
	type Error: 'static + Send + Sync + StdError;

	/// Executes one request and returns its raw response.
	fn execute(
		&self,
		request: UpstreamRequest,
	) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, Self::Error>> + Send + '_>>;
}

/// `reqwest`-backed default transport for upstream REST calls.
#[cfg(feature = "reqwest")]
#[derive(Clone, Default)]
pub struct ReqwestUpstreamHttpClient(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl UpstreamHttpClient for ReqwestUpstreamHttpClient {
	type Error = ReqwestError;

	fn execute(
		&self,
		request: UpstreamRequest,
	) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, Self::Error>> + Send + '_>> {
		let client = self.0.clone();

		Box::pin(async move {
			let method = match request.method {
				UpstreamMethod::Get => reqwest::Method::GET,
				UpstreamMethod::Post => reqwest::Method::POST,
				UpstreamMethod::Put => reqwest::Method::PUT,
				UpstreamMethod::Delete => reqwest::Method::DELETE,
			};
			let mut builder = client
				.request(method, request.url)
				.header("authorization", authorization_header_value(&request.access_token))
				.header("accept", "application/vnd.manageengine.sdp.v3+json");

			if let Some(body) = request.form_body {
				builder = builder
					.header("content-type", "application/x-www-form-urlencoded")
					.body(body);
			}

			let response = builder.send().await?;
			let status = response.status().as_u16();
			let body = response.bytes().await?.to_vec();

			Ok(UpstreamResponse { status, body })
		})
	}
}

/// Formats the upstream's non-standard bearer scheme for the `Authorization` header.
fn authorization_header_value(access_token: &TokenSecret) -> String {
	format!("Zoho-oauthtoken {}", access_token.expose())
}

/// Encodes a JSON payload as the `input_data=<urlencoded-json>` shape the upstream requires,
/// suitable for either a query string fragment or a form body.
pub fn encode_input_data(payload: &serde_json::Value) -> String {
	let json = serde_json::to_string(payload).expect("JSON values always serialize.");

	format!("input_data={}", utf8_percent_encode(&json, QUERY_FRAGMENT))
}

#[derive(Deserialize)]
struct Envelope {
	response_status: ResponseStatus,
}

#[derive(Deserialize)]
struct ResponseStatus {
	status_code: i64,
	messages: Option<Vec<StatusMessage>>,
}

#[derive(Deserialize)]
struct StatusMessage {
	message: String,
	field: Option<String>,
}

/// Classifies one upstream response into a broker-level outcome.
///
/// `http_status` is consulted for 401/429/5xx even when the body fails to parse, because the
/// upstream occasionally returns a bare status with no JSON envelope (e.g. behind a proxy).
fn classify_response(http_status: u16, body: &[u8]) -> Result<serde_json::Value, Error> {
	let parsed: serde_json::Value = match serde_json::from_slice(body) {
		Ok(v) => v,
		Err(_) if (200..300).contains(&http_status) => serde_json::Value::Null,
		Err(_) => return Err(classify_by_http_status(http_status, "Malformed response body.")),
	};

	let envelope: Envelope = match serde_json::from_value(parsed.clone()) {
		Ok(e) => e,
		Err(_) if (200..300).contains(&http_status) => return Ok(parsed),
		Err(_) => return Err(classify_by_http_status(http_status, "Unrecognized response envelope.")),
	};

	if envelope.response_status.status_code == 2000 && (200..300).contains(&http_status) {
		return Ok(parsed);
	}

	let message = envelope
		.response_status
		.messages
		.as_ref()
		.and_then(|m| m.first())
		.map(|m| m.message.clone())
		.unwrap_or_else(|| "Upstream rejected the request.".into());
	let fields: Vec<String> = envelope
		.response_status
		.messages
		.unwrap_or_default()
		.into_iter()
		.filter_map(|m| m.field)
		.collect();

	Err(classify_by_status_code(envelope.response_status.status_code, http_status, message, fields))
}

fn classify_by_status_code(
	status_code: i64,
	http_status: u16,
	message: String,
	fields: Vec<String>,
) -> Error {
	match status_code {
		4001 | 4008 | 4009 | 4012 | 4014 | 4016 | 4021 => Error::UpstreamValidation { message, fields },
		4002 | 7001 => Error::UpstreamPermission { message },
		4007 => Error::UpstreamNotFound,
		4015 => Error::RateLimited { retry_after: Duration::seconds(60) },
		4004 => Error::UpstreamServer { message },
		_ => classify_by_http_status(http_status, &message),
	}
}

fn classify_by_http_status(http_status: u16, message: &str) -> Error {
	match http_status {
		429 => Error::RateLimited { retry_after: Duration::seconds(60) },
		401 => Error::UpstreamPermission { message: "Access token was rejected.".into() },
		404 => Error::UpstreamNotFound,
		400..=499 => Error::UpstreamValidation { message: message.to_owned(), fields: Vec::new() },
		_ => Error::UpstreamServer { message: message.to_owned() },
	}
}

/// True for outcomes that should increment the API circuit breaker (5xx, network-shaped
/// failures); tenant-caused 4xx never count against the breaker.
fn counts_as_breaker_failure(err: &Error) -> bool {
	matches!(err, Error::UpstreamServer { .. } | Error::Network)
}

/// Composes [`TokenManager`], [`RateCoordinator`], [`CircuitBreaker`], and an
/// [`UpstreamHttpClient`] into the typed SaaS operations in [`requests`].
pub struct UpstreamAdapter<H, U> {
	pub(crate) token_manager: Arc<TokenManager<H>>,
	pub(crate) http: U,
	pub(crate) rate: Arc<RateCoordinator>,
	pub(crate) breaker: Arc<CircuitBreaker>,
	pub(crate) metadata: MetadataCache,
}
impl<H, U> UpstreamAdapter<H, U>
where
	H: TokenHttpClient,
	U: UpstreamHttpClient,
{
	/// Builds an adapter from its already-constructed collaborators.
	pub fn new(
		token_manager: Arc<TokenManager<H>>,
		http: U,
		rate: Arc<RateCoordinator>,
		breaker: Arc<CircuitBreaker>,
	) -> Self {
		Self { token_manager, http, rate, breaker, metadata: MetadataCache::new() }
	}

	/// Read-only access to the metadata cache, for callers resolving reference fields.
	pub fn metadata(&self) -> &MetadataCache {
		&self.metadata
	}

	/// Runs one request end to end: call-budget check, breaker admission, token fetch,
	/// transport call, response classification, and the one-retry-on-401 rule.
	pub(crate) async fn call(
		&self,
		tenant: &Tenant,
		method: UpstreamMethod,
		url: Url,
		form_body: Option<String>,
	) -> Result<serde_json::Value, Error> {
		record_operation_outcome(OperationKind::ToolCall, OperationOutcome::Attempt);

		let span = OperationSpan::new(OperationKind::ToolCall, "call");
		let result = span.instrument(self.call_inner(tenant, method, url, form_body)).await;

		record_operation_outcome(
			OperationKind::ToolCall,
			if result.is_ok() { OperationOutcome::Success } else { OperationOutcome::Failure },
		);

		result
	}

	async fn call_inner(
		&self,
		tenant: &Tenant,
		method: UpstreamMethod,
		url: Url,
		form_body: Option<String>,
	) -> Result<serde_json::Value, Error> {
		let now = OffsetDateTime::now_utc();

		if let Grant::Denied { retry_after } = self.rate.record_call(&tenant.id, now) {
			return Err(Error::RateLimited { retry_after });
		}

		if let Admission::Deny { retry_after } = self.breaker.admit(&tenant.id, BreakerTarget::Api, now) {
			return Err(Error::CircuitOpen { target: BreakerTarget::Api.as_str(), retry_after });
		}

		match self.attempt(tenant, method, url.clone(), form_body.clone()).await {
			Ok(value) => {
				self.breaker.record_success(&tenant.id, BreakerTarget::Api);
				self.token_manager.persist_breaker_snapshot(&tenant.id, BreakerTarget::Api).await;

				Ok(value)
			},
			Err(err) if matches!(err, Error::UpstreamPermission { .. }) && is_auth_rejection(&err) => {
				self.token_manager.invalidate(&tenant.id).await;

				let retried = self.attempt(tenant, method, url, form_body).await;

				if let Err(ref e) = retried {
					if counts_as_breaker_failure(e) {
						self.breaker.record_failure(&tenant.id, BreakerTarget::Api, OffsetDateTime::now_utc());
					}
				} else {
					self.breaker.record_success(&tenant.id, BreakerTarget::Api);
				}

				self.token_manager.persist_breaker_snapshot(&tenant.id, BreakerTarget::Api).await;

				retried
			},
			Err(err) => {
				if counts_as_breaker_failure(&err) {
					self.breaker.record_failure(&tenant.id, BreakerTarget::Api, now);
					self.token_manager.persist_breaker_snapshot(&tenant.id, BreakerTarget::Api).await;
				}

				Err(err)
			},
		}
	}

	async fn attempt(
		&self,
		tenant: &Tenant,
		method: UpstreamMethod,
		url: Url,
		form_body: Option<String>,
	) -> Result<serde_json::Value, Error> {
		let access_token = self
			.token_manager
			.get_access_token(tenant)
			.await
			.map_err(|e| match e {
				TokenManagerError::NeedsReauth => Error::NeedsReauth { setup_url: None },
				TokenManagerError::UnknownTenant => Error::UpstreamNotFound,
				TokenManagerError::Unavailable { retry_after, .. } => Error::RateLimited { retry_after },
			})?
			.secret;
		let request = UpstreamRequest { method, url, access_token, form_body };
		let response = self.http.execute(request).await.map_err(|_| Error::Network)?;

		classify_response(response.status, &response.body)
	}
}

fn is_auth_rejection(err: &Error) -> bool {
	matches!(err, Error::UpstreamPermission { message } if message.contains("Access token"))
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn authorization_header_uses_the_upstream_bearer_scheme() {
		let token = TokenSecret::new("abc123");

		assert_eq!(authorization_header_value(&token), "Zoho-oauthtoken abc123");
	}

	#[test]
	fn encode_input_data_percent_encodes_the_json_payload() {
		let encoded = encode_input_data(&serde_json::json!({"request": {"subject": "a b"}}));

		assert!(encoded.starts_with("input_data="));
		assert!(!encoded.contains(' '));
	}

	#[test]
	fn classify_response_accepts_status_code_2000() {
		let body = br#"{"response_status": {"status_code": 2000}, "request": {"id": "1"}}"#;
		let value = classify_response(200, body).unwrap();

		assert_eq!(value["request"]["id"], "1");
	}

	#[test]
	fn classify_response_maps_validation_status_code() {
		let body = br#"{"response_status": {"status_code": 4012, "messages": [{"message": "Mandatory field missing.", "field": "subject"}]}}"#;
		let err = classify_response(400, body).unwrap_err();

		assert!(matches!(err, Error::UpstreamValidation { ref fields, .. } if fields == &["subject".to_owned()]));
	}

	#[test]
	fn classify_response_maps_rate_limit_status_code() {
		let body = br#"{"response_status": {"status_code": 4015}}"#;
		let err = classify_response(400, body).unwrap_err();

		assert!(matches!(err, Error::RateLimited { .. }));
	}

	#[test]
	fn classify_response_falls_back_to_http_status_on_malformed_body() {
		let err = classify_response(503, b"not json").unwrap_err();

		assert!(matches!(err, Error::UpstreamServer { .. }));
	}

	#[test]
	fn counts_as_breaker_failure_excludes_tenant_caused_errors() {
		assert!(!counts_as_breaker_failure(&Error::UpstreamValidation {
			message: "x".into(),
			fields: vec![],
		}));
		assert!(counts_as_breaker_failure(&Error::UpstreamServer { message: "x".into() }));
	}
}
