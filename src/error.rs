//! Broker-level error types shared across every component.

// self
use crate::_prelude::*;

/// Broker-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical broker error exposed by public APIs.
///
/// Each variant maps to exactly one JSON-RPC error object via [`Error::to_jsonrpc_error`];
/// that method is the only place in the crate that performs the translation.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Temporary upstream failure; retry with backoff.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Tamper or key-mismatch detected while decrypting a stored secret.
	#[error(transparent)]
	Crypto(#[from] crate::crypto::CryptoError),

	/// Caller-supplied tool arguments failed schema validation.
	#[error("Invalid parameters: {reason}.")]
	InvalidParams {
		/// Human-readable description of what failed validation.
		reason: String,
		/// Field paths that failed, when known.
		fields: Vec<String>,
	},
	/// `tools/call` named a tool absent from the registry.
	#[error("Method not found: {method}.")]
	MethodNotFound {
		/// The unrecognized tool or method name.
		method: String,
	},
	/// Tenant has not been granted the scope required by the tool.
	#[error("Tenant lacks the required scope: {scope}.")]
	ForbiddenByScope {
		/// Missing scope name.
		scope: String,
	},
	/// Refresh token is gone or revoked; the tenant must redo OAuth setup.
	#[error("Tenant needs to complete OAuth setup again.")]
	NeedsReauth {
		/// URL the operator can follow to redo onboarding, if known.
		setup_url: Option<String>,
	},
	/// RateCoordinator denied the operation, or upstream signalled a rate limit.
	#[error("Rate limited; retry after {retry_after:?}.")]
	RateLimited {
		/// Suggested wait before retrying.
		retry_after: Duration,
	},
	/// CircuitBreaker is open for the named target.
	#[error("Circuit open for {target}; retry after {retry_after:?}.")]
	CircuitOpen {
		/// Which upstream target tripped the breaker (`identity` or `api`).
		target: &'static str,
		/// Suggested wait before retrying.
		retry_after: Duration,
	},
	/// Upstream rejected the request for a caller-fixable reason.
	#[error("Upstream validation failed: {message}.")]
	UpstreamValidation {
		/// Provider-supplied message.
		message: String,
		/// Field names implicated, when the provider names them.
		fields: Vec<String>,
	},
	/// Upstream rejected the operation for a business/permission reason.
	#[error("Upstream permission error: {message}.")]
	UpstreamPermission {
		/// Provider-supplied message.
		message: String,
	},
	/// Upstream resource does not exist.
	#[error("Upstream resource not found.")]
	UpstreamNotFound,
	/// Upstream returned a server-side or otherwise transient error.
	#[error("Upstream server error: {message}.")]
	UpstreamServer {
		/// Provider-supplied message, when available.
		message: String,
	},
	/// Transport-level failure while calling upstream.
	#[error("Network error while calling upstream.")]
	Network,
	/// Internal programming error; details never leave the process.
	#[error("Internal error (correlation id: {correlation_id}).")]
	Internal {
		/// ULID-shaped correlation id a caller can hand to an operator.
		correlation_id: String,
	},
}
impl Error {
	/// Builds an [`Error::Internal`] from an opaque failure, generating a correlation id.
	///
	/// The source error's `Display` is deliberately dropped: callers only ever see the
	/// correlation id, so logs (not RPC responses) are the channel for the real detail.
	pub fn internal(source: impl std::fmt::Display) -> Self {
		let correlation_id = new_correlation_id();

		tracing::error!(correlation_id, %source, "internal error");

		Self::Internal { correlation_id }
	}

	/// Translates the error into a JSON-RPC 2.0 error object.
	///
	/// Standard codes (`-32600..-32603`) are reserved for framing errors raised outside this
	/// enum; every variant here lives in the application range `-32000..-32099`.
	pub fn to_jsonrpc_error(&self) -> JsonRpcError {
		match self {
			Self::InvalidParams { reason, fields } => JsonRpcError {
				code: -32602,
				message: reason.clone(),
				data: Some(json_fields(fields, None, None)),
			},
			Self::MethodNotFound { method } =>
				JsonRpcError { code: -32601, message: format!("Method not found: {method}."), data: None },
			Self::ForbiddenByScope { scope } => JsonRpcError {
				code: -32001,
				message: format!("Missing required scope: {scope}."),
				data: None,
			},
			Self::NeedsReauth { setup_url } => JsonRpcError {
				code: -32002,
				message: "Tenant must complete OAuth setup again.".into(),
				data: setup_url.as_ref().map(|url| serde_json::json!({ "setup_url": url })),
			},
			Self::RateLimited { retry_after } => JsonRpcError {
				code: -32003,
				message: "Rate limited.".into(),
				data: Some(retry_after_payload(*retry_after)),
			},
			Self::CircuitOpen { target, retry_after } => JsonRpcError {
				code: -32004,
				message: format!("Circuit open for {target}."),
				data: Some(retry_after_payload(*retry_after)),
			},
			Self::UpstreamValidation { message, fields } => JsonRpcError {
				code: -32005,
				message: message.clone(),
				data: Some(json_fields(fields, None, None)),
			},
			Self::UpstreamPermission { message } =>
				JsonRpcError { code: -32006, message: message.clone(), data: None },
			Self::UpstreamNotFound =>
				JsonRpcError { code: -32007, message: "Resource not found.".into(), data: None },
			Self::UpstreamServer { message } =>
				JsonRpcError { code: -32008, message: message.clone(), data: None },
			Self::Network =>
				JsonRpcError { code: -32009, message: "Network error.".into(), data: None },
			Self::Internal { correlation_id } => JsonRpcError {
				code: -32603,
				message: "Internal error.".into(),
				data: Some(serde_json::json!({ "correlation_id": correlation_id })),
			},
			other => JsonRpcError { code: -32603, message: other.to_string(), data: None },
		}
	}
}

/// JSON-RPC 2.0 error object, per the application error range in §6.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcError {
	/// Numeric error code.
	pub code: i64,
	/// Human-readable, display-safe message.
	pub message: String,
	/// Optional structured detail (retry_after, fields, correlation id, …).
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<serde_json::Value>,
}

fn retry_after_payload(retry_after: Duration) -> serde_json::Value {
	serde_json::json!({ "retry_after_secs": retry_after.whole_seconds().max(0) })
}

fn json_fields(
	fields: &[String],
	_unused_a: Option<()>,
	_unused_b: Option<()>,
) -> serde_json::Value {
	serde_json::json!({ "fields": fields })
}

fn new_correlation_id() -> String {
	// Not a real ULID encoder; a time-sortable, uppercase Crockford-ish token is enough for an
	// operator to grep logs with.
	let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
	let rand_tail: u32 = rand::random();

	format!("{millis:013X}{rand_tail:08X}")
}

/// Configuration and validation failures raised before or during startup.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// A configured URL failed to parse.
	#[error("Configuration contains an invalid URL: {context}.")]
	InvalidUrl {
		/// What the URL was for (descriptor field, redirect, etc.).
		context: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: oauth2::url::ParseError,
	},
	/// `SDP_BROKER_MASTER_KEY` is missing or not valid hex.
	#[error("Master key is missing or not valid 256-bit hex: {reason}.")]
	InvalidMasterKey {
		/// Why the value was rejected.
		reason: String,
	},
	/// A required environment variable was not set.
	#[error("Missing required environment variable {name}.")]
	MissingEnvVar {
		/// Variable name, without value.
		name: &'static str,
	},
	/// An environment variable held a value that could not be parsed.
	#[error("Environment variable {name} has an invalid value: {reason}.")]
	InvalidEnvVar {
		/// Variable name.
		name: &'static str,
		/// Why parsing failed.
		reason: String,
	},
	/// `SDP_BROKER_STORE_DSN` used an unrecognised scheme.
	#[error("Unsupported store DSN scheme: {scheme}.")]
	UnsupportedStoreScheme {
		/// The scheme that was rejected.
		scheme: String,
	},
	/// `data_center` tag did not match any known entry.
	#[error("Unknown data center tag: {tag}.")]
	UnknownDataCenter {
		/// The tag that failed to resolve.
		tag: String,
	},
	/// Cached record is missing a refresh secret.
	#[error("Cached credential record is missing a refresh token.")]
	MissingRefreshToken,
	/// Requested scopes cannot be normalized.
	#[error("Requested scopes are invalid.")]
	InvalidScope(#[from] crate::auth::ScopeValidationError),
	/// Token endpoint response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<reqwest::Error> for ConfigError {
	fn from(e: reqwest::Error) -> Self {
		Self::http_client_build(e)
	}
}

/// Temporary failure variants (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Provider returned an unexpected but non-fatal response.
	#[error("Token endpoint returned an unexpected response: {message}.")]
	TokenEndpoint {
		/// Provider- or broker-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Token endpoint responded with malformed JSON that could not be parsed.
	#[error("Token endpoint returned malformed JSON.")]
	TokenResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::error::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Provider reported a rate limit on the token endpoint.
	#[error("Provider rate limited the token endpoint; retry after {retry_after:?}.")]
	ProviderRateLimited {
		/// Parsed or defaulted retry delay.
		retry_after: Duration,
	},
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling upstream.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling upstream.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn rate_limited_carries_retry_after_in_jsonrpc_payload() {
		let err = Error::RateLimited { retry_after: Duration::seconds(42) };
		let rpc = err.to_jsonrpc_error();

		assert_eq!(rpc.code, -32003);
		assert_eq!(rpc.data.unwrap()["retry_after_secs"], 42);
	}

	#[test]
	fn internal_error_never_exposes_source_text() {
		let err = Error::internal("some leaky detail that must not reach callers");
		let rpc = err.to_jsonrpc_error();

		assert_eq!(rpc.code, -32603);
		assert!(!rpc.message.contains("leaky"));
	}

	#[test]
	fn needs_reauth_carries_optional_setup_url() {
		let err = Error::NeedsReauth { setup_url: Some("https://broker.example/setup".into()) };
		let rpc = err.to_jsonrpc_error();

		assert_eq!(rpc.code, -32002);
		assert!(rpc.data.unwrap()["setup_url"].as_str().unwrap().contains("setup"));
	}
}
