//! Multi-tenant broker exposing Service Desk Plus Cloud to AI assistants over MCP/SSE, with
//! CAS-smart token rotation, per-tenant rate limiting, and transport-aware observability.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod breaker;
pub mod config;
pub mod crypto;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod oauth_client;
pub mod obs;
pub mod rate;
pub mod session;
pub mod store;
pub mod token_manager;
pub mod upstream;

#[cfg(all(any(test, feature = "test"), feature = "reqwest"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		breaker::{BreakerThresholds, CircuitBreaker},
		crypto::{CryptoBox, MasterKey},
		http::ReqwestHttpClient,
		oauth_client::OAuthClient,
		rate::{RateCoordinator, RateThresholds},
		store::{CredentialStore, MemoryStore},
		token_manager::TokenManager,
	};

	/// TokenManager type alias used by reqwest-backed integration tests.
	pub type ReqwestTestTokenManager = TokenManager<ReqwestHttpClient>;

	/// Builds a reqwest HTTP client that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	pub fn test_reqwest_http_client() -> ReqwestHttpClient {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		ReqwestHttpClient::with_client(client)
	}

	/// Builds a [`MasterKey`] fixture for tests; not suitable for production use.
	pub fn test_master_key() -> MasterKey {
		MasterKey::from_bytes(&[0x42_u8; 32]).expect("Fixed-size test master key must be valid.")
	}

	/// Constructs a [`TokenManager`] backed by an in-memory store, default thresholds, and the
	/// reqwest transport used across integration tests.
	pub fn build_reqwest_test_token_manager() -> (ReqwestTestTokenManager, Arc<MemoryStore>) {
		let store_backend = Arc::new(MemoryStore::new());
		let store: Arc<dyn CredentialStore> = store_backend.clone();
		let crypto = Arc::new(CryptoBox::new(test_master_key()));
		let rate = Arc::new(RateCoordinator::new(RateThresholds::default()));
		let breaker = Arc::new(CircuitBreaker::new(BreakerThresholds::default()));
		let oauth = Arc::new(OAuthClient::new(test_reqwest_http_client()));
		let manager = TokenManager::new(store, crypto, rate, breaker, oauth);

		(manager, store_backend)
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap, hash_map::DefaultHasher},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		hash::{Hash, Hasher},
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use tracing;
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
use {color_eyre as _, tower as _, tower_http as _, tracing_subscriber as _};
#[cfg(all(test, feature = "reqwest"))] use httpmock as _;
