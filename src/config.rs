//! Environment-driven process configuration (§6). Loaded once at startup; components receive
//! borrowed references or cloned `Arc`s afterward and never read the environment directly.

// std
use std::env;
// self
use crate::{
	_prelude::*,
	auth::DataCenter,
	breaker::BreakerThresholds,
	crypto::MasterKey,
	error::ConfigError,
	rate::RateThresholds,
};

/// Selects which [`crate::store::CredentialStore`] backend to construct.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreBackend {
	/// In-process map; loses all state on restart.
	Memory,
	/// JSON file at the given path.
	File(std::path::PathBuf),
}

/// Log output shape for the `tracing-subscriber` formatter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
	/// Human-readable, multi-line output for local development.
	Pretty,
	/// Single-line JSON, for log aggregators.
	Json,
}

/// Fully validated, immutable process configuration (§3 `BrokerConfig`).
#[derive(Clone, Debug)]
pub struct BrokerConfig {
	/// HTTP/SSE bind address.
	pub listen_addr: String,
	/// Optional TLS certificate path; TLS is disabled when absent.
	pub tls_cert_path: Option<std::path::PathBuf>,
	/// Optional TLS private key path; TLS is disabled when absent.
	pub tls_key_path: Option<std::path::PathBuf>,
	/// Master key used to derive per-tenant encryption subkeys.
	pub master_key: MasterKey,
	/// Selected credential store backend.
	pub store_backend: StoreBackend,
	/// Fallback data center for onboarding requests that omit one.
	pub default_data_center: DataCenter,
	/// SSE idle-session timeout.
	pub session_idle_timeout: Duration,
	/// Access-token early-expiry margin.
	pub token_safety_margin: Duration,
	/// RateCoordinator thresholds.
	pub rate_thresholds: RateThresholds,
	/// CircuitBreaker thresholds.
	pub breaker_thresholds: BreakerThresholds,
	/// Per-tool-call cancellation deadline.
	pub tool_call_deadline: Duration,
	/// `tracing` env-filter directive.
	pub log_level: String,
	/// Log output format.
	pub log_format: LogFormat,
	/// Header name carrying the tenant's client id during SSE session open.
	pub credential_header_id: String,
	/// Header name carrying the tenant's client secret during SSE session open.
	pub credential_header_secret: String,
}
impl BrokerConfig {
	/// Loads and validates configuration from the process environment.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_source(|name| env::var(name).ok())
	}

	/// Loads configuration from an arbitrary lookup function; used directly by tests so they
	/// never depend on process-global environment state.
	pub fn from_source(lookup: impl Fn(&'static str) -> Option<String>) -> Result<Self, ConfigError> {
		let listen_addr = lookup("SDP_BROKER_LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0:8080".into());
		let tls_cert_path = lookup("SDP_BROKER_TLS_CERT_PATH").map(std::path::PathBuf::from);
		let tls_key_path = lookup("SDP_BROKER_TLS_KEY_PATH").map(std::path::PathBuf::from);
		let master_key_hex = lookup("SDP_BROKER_MASTER_KEY")
			.ok_or(ConfigError::MissingEnvVar { name: "SDP_BROKER_MASTER_KEY" })?;
		let master_key = MasterKey::from_hex(&master_key_hex)
			.map_err(|e| ConfigError::InvalidMasterKey { reason: e.to_string() })?;
		let store_backend = match lookup("SDP_BROKER_STORE_DSN") {
			None => StoreBackend::Memory,
			Some(dsn) => parse_store_dsn(&dsn)?,
		};
		let default_data_center_tag =
			lookup("SDP_BROKER_DEFAULT_DATA_CENTER").unwrap_or_else(|| "US".into());
		let default_data_center = DataCenter::parse(&default_data_center_tag)
			.ok_or(ConfigError::UnknownDataCenter { tag: default_data_center_tag })?;
		let session_idle_timeout =
			parse_secs(&lookup, "SDP_BROKER_SESSION_IDLE_TIMEOUT_SECS", 1_800)?;
		let token_safety_margin =
			parse_secs(&lookup, "SDP_BROKER_TOKEN_SAFETY_MARGIN_SECS", 300)?;
		let rate_thresholds = RateThresholds {
			refresh_min_interval: parse_secs(&lookup, "SDP_BROKER_REFRESH_MIN_INTERVAL_SECS", 180)?,
			refresh_max_per_window: parse_count(&lookup, "SDP_BROKER_REFRESH_MAX_PER_WINDOW", 10)?,
			refresh_window: parse_secs(&lookup, "SDP_BROKER_REFRESH_WINDOW_SECS", 600)?,
			calls_per_minute: parse_u32(&lookup, "SDP_BROKER_CALL_BUDGET_PER_MINUTE", 60)?,
			calls_per_hour: parse_u32(&lookup, "SDP_BROKER_CALL_BUDGET_PER_HOUR", 1_000)?,
			calls_per_day: parse_u32(&lookup, "SDP_BROKER_CALL_BUDGET_PER_DAY", 10_000)?,
		};
		let breaker_thresholds = BreakerThresholds {
			failure_threshold: parse_u32(&lookup, "SDP_BROKER_BREAKER_FAILURE_THRESHOLD", 5)?,
			success_threshold: parse_u32(&lookup, "SDP_BROKER_BREAKER_SUCCESS_THRESHOLD", 2)?,
			reset_timeout: parse_secs(&lookup, "SDP_BROKER_BREAKER_RESET_TIMEOUT_SECS", 300)?,
		};
		let tool_call_deadline = parse_secs(&lookup, "SDP_BROKER_TOOL_CALL_DEADLINE_SECS", 60)?;
		let log_level = lookup("SDP_BROKER_LOG_LEVEL").unwrap_or_else(|| "info".into());
		let log_format = match lookup("SDP_BROKER_LOG_FORMAT").as_deref() {
			None | Some("pretty") => LogFormat::Pretty,
			Some("json") => LogFormat::Json,
			Some(other) => return Err(ConfigError::InvalidEnvVar {
				name: "SDP_BROKER_LOG_FORMAT",
				reason: format!("expected \"pretty\" or \"json\", got \"{other}\""),
			}),
		};
		let credential_header_id =
			lookup("SDP_BROKER_CREDENTIAL_HEADER_ID").unwrap_or_else(|| "x-sdp-client-id".into());
		let credential_header_secret = lookup("SDP_BROKER_CREDENTIAL_HEADER_SECRET")
			.unwrap_or_else(|| "x-sdp-client-secret".into());

		Ok(Self {
			listen_addr,
			tls_cert_path,
			tls_key_path,
			master_key,
			store_backend,
			default_data_center,
			session_idle_timeout,
			token_safety_margin,
			rate_thresholds,
			breaker_thresholds,
			tool_call_deadline,
			log_level,
			log_format,
			credential_header_id,
			credential_header_secret,
		})
	}
}

fn parse_store_dsn(dsn: &str) -> Result<StoreBackend, ConfigError> {
	if dsn == "memory://" || dsn.is_empty() {
		return Ok(StoreBackend::Memory);
	}

	if let Some(path) = dsn.strip_prefix("file://") {
		return Ok(StoreBackend::File(std::path::PathBuf::from(path)));
	}

	let scheme = dsn.split("://").next().unwrap_or(dsn).to_owned();

	Err(ConfigError::UnsupportedStoreScheme { scheme })
}

fn parse_secs(
	lookup: &impl Fn(&'static str) -> Option<String>,
	name: &'static str,
	default_secs: i64,
) -> Result<Duration, ConfigError> {
	Ok(Duration::seconds(parse_i64(lookup, name, default_secs)?))
}

fn parse_i64(
	lookup: &impl Fn(&'static str) -> Option<String>,
	name: &'static str,
	default: i64,
) -> Result<i64, ConfigError> {
	match lookup(name) {
		None => Ok(default),
		Some(raw) => raw
			.parse()
			.map_err(|_| ConfigError::InvalidEnvVar { name, reason: format!("not an integer: {raw}") }),
	}
}

fn parse_u32(
	lookup: &impl Fn(&'static str) -> Option<String>,
	name: &'static str,
	default: u32,
) -> Result<u32, ConfigError> {
	match lookup(name) {
		None => Ok(default),
		Some(raw) => raw
			.parse()
			.map_err(|_| ConfigError::InvalidEnvVar { name, reason: format!("not a non-negative integer: {raw}") }),
	}
}

fn parse_count(
	lookup: &impl Fn(&'static str) -> Option<String>,
	name: &'static str,
	default: usize,
) -> Result<usize, ConfigError> {
	match lookup(name) {
		None => Ok(default),
		Some(raw) => raw
			.parse()
			.map_err(|_| ConfigError::InvalidEnvVar { name, reason: format!("not a non-negative integer: {raw}") }),
	}
}
