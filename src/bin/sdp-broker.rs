//! Composition root: wires `BrokerConfig` into the full component graph and starts the `axum`
//! listener. Contains no broker logic of its own (§10).

// std
use std::sync::Arc;
// crates.io
use tracing_subscriber::EnvFilter;
// self
use sdp_mcp_broker::{
	breaker::CircuitBreaker,
	config::{BrokerConfig, LogFormat, StoreBackend},
	crypto::CryptoBox,
	dispatcher::ToolDispatcher,
	http::ReqwestHttpClient,
	oauth_client::OAuthClient,
	rate::RateCoordinator,
	session::{AppState, SessionManager, TenantDirectory, router},
	store::{CredentialStore, FileStore, MemoryStore},
	token_manager::TokenManager,
	upstream::{ReqwestUpstreamHttpClient, UpstreamAdapter},
};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let config = BrokerConfig::from_env()?;

	init_tracing(&config.log_level, config.log_format);

	if config.tls_cert_path.is_some() || config.tls_key_path.is_some() {
		tracing::warn!(
			"TLS_CERT_PATH/TLS_KEY_PATH are configured but this binary always terminates TLS at a \
			 reverse proxy; bind a plaintext listener behind one, or route around this warning by \
			 leaving both unset."
		);
	}

	let store: Arc<dyn CredentialStore> = match config.store_backend {
		StoreBackend::Memory => Arc::new(MemoryStore::new()),
		StoreBackend::File(path) => Arc::new(FileStore::open(path)?),
	};
	let crypto = Arc::new(CryptoBox::new(config.master_key));
	let rate = Arc::new(RateCoordinator::new(config.rate_thresholds));
	let breaker = Arc::new(CircuitBreaker::new(config.breaker_thresholds));
	let http_client = reqwest::Client::new();
	let oauth = Arc::new(OAuthClient::new(ReqwestHttpClient::with_client(http_client.clone())));
	let token_manager = Arc::new(TokenManager::with_safety_margin(
		Arc::clone(&store),
		Arc::clone(&crypto),
		Arc::clone(&rate),
		Arc::clone(&breaker),
		Arc::clone(&oauth),
		config.token_safety_margin,
	));

	// Every tenant's breaker snapshot lives in its credential record; without this, a restart
	// would silently reopen every tripped breaker and re-admit traffic the breaker was put in
	// place to shed.
	token_manager.restore_breakers().await;

	let adapter = Arc::new(UpstreamAdapter::new(
		token_manager,
		ReqwestUpstreamHttpClient(http_client),
		Arc::clone(&rate),
		Arc::clone(&breaker),
	));
	let dispatcher = Arc::new(ToolDispatcher::new(adapter));
	let tenants = Arc::new(TenantDirectory::new());
	let sessions = Arc::new(SessionManager::with_timeouts(
		dispatcher,
		tenants,
		store,
		crypto,
		oauth,
		config.session_idle_timeout,
		config.tool_call_deadline,
	));

	sessions.spawn_idle_reaper(std::time::Duration::from_secs(60));

	let state = Arc::new(AppState {
		sessions,
		credential_header_id: config.credential_header_id,
		credential_header_secret: config.credential_header_secret,
	});
	let app = router(state);

	tracing::info!(addr = %config.listen_addr, "starting sdp-mcp-broker");

	let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;

	axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

	Ok(())
}

async fn shutdown_signal() {
	let ctrl_c = async {
		tokio::signal::ctrl_c().await.expect("Failed to install Ctrl+C handler.");
	};

	#[cfg(unix)]
	let terminate = async {
		tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
			.expect("Failed to install SIGTERM handler.")
			.recv()
			.await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}

	tracing::info!("shutdown signal received");
}

fn init_tracing(log_level: &str, format: LogFormat) {
	let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
	let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

	match format {
		LogFormat::Json => subscriber.json().init(),
		LogFormat::Pretty => subscriber.init(),
	}
}
