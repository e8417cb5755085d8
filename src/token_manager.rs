//! Combines TokenStore, RateCoordinator, CircuitBreaker, and OAuthClient to answer one
//! question: "give me a valid access token for tenant T" (§4.6, the critical component).

// self
use crate::{
	_prelude::*,
	auth::{TenantId, TokenSecret, tenant::Tenant},
	breaker::{Admission, BreakerTarget, CircuitBreaker},
	crypto::CryptoBox,
	oauth_client::{OAuthClient, OAuthError},
	obs::{OperationKind, OperationOutcome, OperationSpan, record_operation_outcome},
	rate::{Grant, RateCoordinator},
	store::CredentialStore,
};

/// Default clock-skew tolerance applied to cached access tokens (§4.5, §6
/// `SDP_BROKER_TOKEN_SAFETY_MARGIN_SECS`).
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::seconds(300);

/// Successful outcome of [`TokenManager::get_access_token`].
#[derive(Clone)]
pub struct AccessToken {
	/// The bearer token to attach to upstream requests.
	pub secret: TokenSecret,
	/// Absolute expiry, for callers that want to log or pre-empt refreshes.
	pub expires_at: OffsetDateTime,
}

/// Failure outcomes of [`TokenManager::get_access_token`] (§4.6 contract).
#[derive(Clone, Debug, ThisError)]
pub enum TokenManagerError {
	/// The tenant must complete OAuth setup again; no amount of retrying will help.
	#[error("Tenant needs to complete OAuth setup again.")]
	NeedsReauth,
	/// A transient condition is blocking refresh; retry after the given delay.
	#[error("Token unavailable ({reason}); retry after {retry_after:?}.")]
	Unavailable {
		/// Machine-readable reason, one of `refresh_rate_limited`, `identity_circuit_open`,
		/// `provider_rate_limited`, `refresh_conflict`, or `refresh_failed`.
		reason: &'static str,
		/// Suggested wait before retrying.
		retry_after: Duration,
	},
	/// No credential record exists for this tenant at all.
	#[error("Unknown tenant.")]
	UnknownTenant,
}

/// Answers "give me a valid access token for tenant T," proactively refreshing and enforcing
/// single-flight, rate-limited, circuit-broken access to the identity provider.
pub struct TokenManager<H> {
	store: Arc<dyn CredentialStore>,
	crypto: Arc<CryptoBox>,
	rate: Arc<RateCoordinator>,
	breaker: Arc<CircuitBreaker>,
	oauth: Arc<OAuthClient<H>>,
	safety_margin: Duration,
	refresh_guards: Mutex<HashMap<TenantId, Arc<AsyncMutex<()>>>>,
}
impl<H> TokenManager<H>
where
	H: crate::http::TokenHttpClient,
{
	/// Builds a manager around its four collaborators, using the default safety margin.
	pub fn new(
		store: Arc<dyn CredentialStore>,
		crypto: Arc<CryptoBox>,
		rate: Arc<RateCoordinator>,
		breaker: Arc<CircuitBreaker>,
		oauth: Arc<OAuthClient<H>>,
	) -> Self {
		Self::with_safety_margin(store, crypto, rate, breaker, oauth, DEFAULT_SAFETY_MARGIN)
	}

	/// Builds a manager with an explicit safety margin, for configuration-driven overrides.
	pub fn with_safety_margin(
		store: Arc<dyn CredentialStore>,
		crypto: Arc<CryptoBox>,
		rate: Arc<RateCoordinator>,
		breaker: Arc<CircuitBreaker>,
		oauth: Arc<OAuthClient<H>>,
		safety_margin: Duration,
	) -> Self {
		Self { store, crypto, rate, breaker, oauth, safety_margin, refresh_guards: Mutex::new(HashMap::new()) }
	}

	/// Returns a valid access token for `tenant`, refreshing it if necessary (§4.6 algorithm).
	pub async fn get_access_token(&self, tenant: &Tenant) -> Result<AccessToken, TokenManagerError> {
		let tenant_id = &tenant.id;

		// Step 1-2: fast path, no guard needed.
		if let Some(token) = self.fast_path(tenant_id).await? {
			return Ok(token);
		}

		// Step 3: acquire the per-tenant refresh guard.
		let guard = self.guard_for(tenant_id);
		let _permit = guard.lock().await;

		// Double-checked: another caller may have refreshed while we waited for the guard.
		if let Some(token) = self.fast_path(tenant_id).await? {
			return Ok(token);
		}

		record_operation_outcome(OperationKind::Refresh, OperationOutcome::Attempt);

		let span = OperationSpan::new(OperationKind::Refresh, "refresh_locked");
		let result = span.instrument(self.refresh_locked(tenant)).await;

		record_operation_outcome(
			OperationKind::Refresh,
			if result.is_ok() { OperationOutcome::Success } else { OperationOutcome::Failure },
		);

		result
	}

	/// Steps 1-2 of the algorithm: load the record, check reauth, check freshness.
	async fn fast_path(&self, tenant_id: &TenantId) -> Result<Option<AccessToken>, TokenManagerError> {
		let record =
			self.store.get(tenant_id).await.map_err(|_| TokenManagerError::UnknownTenant)?;
		let record = record.ok_or(TokenManagerError::UnknownTenant)?;

		if record.requires_reauth() {
			return Err(TokenManagerError::NeedsReauth);
		}

		let now = OffsetDateTime::now_utc();

		if record.access_token_fresh(now, self.safety_margin) {
			let Some(blob) = record.encrypted_access_token.as_ref() else {
				return Ok(None);
			};
			let plaintext = self
				.crypto
				.decrypt(tenant_id, blob)
				.map_err(|_| TokenManagerError::NeedsReauth)?;
			let secret = TokenSecret::new(
				String::from_utf8(plaintext).map_err(|_| TokenManagerError::NeedsReauth)?,
			);

			return Ok(Some(AccessToken { secret, expires_at: record.access_token_expires_at }));
		}

		Ok(None)
	}

	/// Steps 4-6 of the algorithm, run while holding the per-tenant refresh guard.
	async fn refresh_locked(&self, tenant: &Tenant) -> Result<AccessToken, TokenManagerError> {
		let tenant_id = &tenant.id;
		let now = OffsetDateTime::now_utc();

		if let Grant::Denied { retry_after } = self.rate.reserve_refresh(tenant_id, now) {
			return Err(TokenManagerError::Unavailable { reason: "refresh_rate_limited", retry_after });
		}

		if let Admission::Deny { retry_after } = self.breaker.admit(tenant_id, BreakerTarget::Identity, now) {
			return Err(TokenManagerError::Unavailable { reason: "identity_circuit_open", retry_after });
		}

		let record = self
			.store
			.get(tenant_id)
			.await
			.map_err(|_| TokenManagerError::UnknownTenant)?
			.ok_or(TokenManagerError::UnknownTenant)?;
		let Some(refresh_blob) = record.encrypted_refresh_token.clone() else {
			return Err(TokenManagerError::NeedsReauth);
		};
		let refresh_plaintext = self
			.crypto
			.decrypt(tenant_id, &refresh_blob)
			.map_err(|_| TokenManagerError::NeedsReauth)?;
		let refresh_secret = TokenSecret::new(
			String::from_utf8(refresh_plaintext).map_err(|_| TokenManagerError::NeedsReauth)?,
		);

		match self.oauth.refresh(tenant, &refresh_secret).await {
			Ok(outcome) => {
				self.rate.record_refresh(tenant_id, now);
				self.breaker.record_success(tenant_id, BreakerTarget::Identity);

				let access_blob = self
					.crypto
					.encrypt(tenant_id, outcome.access_token.expose().as_bytes())
					.map_err(|_| TokenManagerError::Unavailable {
						reason: "refresh_failed",
						retry_after: Duration::seconds(5),
					})?;
				let rotated_refresh_blob = match outcome.refresh_token {
					Some(rotated) => Some(
						self.crypto
							.encrypt(tenant_id, rotated.expose().as_bytes())
							.map_err(|_| TokenManagerError::Unavailable {
								reason: "refresh_failed",
								retry_after: Duration::seconds(5),
							})?,
					),
					None => None,
				};

				let mut updated = record;

				updated.apply_refresh(access_blob, outcome.expires_at, rotated_refresh_blob, now);
				updated.identity_breaker = self.breaker.snapshot(tenant_id, BreakerTarget::Identity);

				// Rotates the refresh token atomically against whatever was read at the top of
				// this function, so a concurrent refresh on another broker instance sharing the
				// same store can't clobber or resurrect an already-rotated secret.
				match self
					.store
					.compare_and_swap_refresh(tenant_id, Some(&refresh_blob), updated)
					.await
					.map_err(|_| TokenManagerError::Unavailable {
						reason: "refresh_failed",
						retry_after: Duration::seconds(5),
					})? {
					crate::store::CompareAndSwapOutcome::Updated => {},
					crate::store::CompareAndSwapOutcome::RefreshMismatch =>
						return Err(TokenManagerError::Unavailable {
							reason: "refresh_conflict",
							retry_after: Duration::seconds(1),
						}),
					crate::store::CompareAndSwapOutcome::Missing => return Err(TokenManagerError::UnknownTenant),
				}

				Ok(AccessToken { secret: outcome.access_token, expires_at: outcome.expires_at })
			},
			Err(err) if err.is_durable_auth_failure() => {
				self.store.mark_needs_reauth(tenant_id).await.ok();

				Err(TokenManagerError::NeedsReauth)
			},
			Err(OAuthError::RateLimited { retry_after }) => {
				self.breaker.record_failure(tenant_id, BreakerTarget::Identity, now);
				self.persist_breaker_snapshot(tenant_id, BreakerTarget::Identity).await;

				Err(TokenManagerError::Unavailable { reason: "provider_rate_limited", retry_after })
			},
			Err(_) => {
				self.breaker.record_failure(tenant_id, BreakerTarget::Identity, now);
				self.persist_breaker_snapshot(tenant_id, BreakerTarget::Identity).await;

				Err(TokenManagerError::Unavailable {
					reason: "refresh_failed",
					retry_after: Duration::seconds(30),
				})
			},
		}
	}

	/// Writes the in-memory breaker's current snapshot for (`tenant_id`, `target`) back into the
	/// credential record, so a restart doesn't silently reopen every tripped breaker (§4.4).
	pub(crate) async fn persist_breaker_snapshot(&self, tenant_id: &TenantId, target: BreakerTarget) {
		let Ok(Some(mut record)) = self.store.get(tenant_id).await else {
			return;
		};
		let snapshot = self.breaker.snapshot(tenant_id, target);

		match target {
			BreakerTarget::Identity => record.identity_breaker = snapshot,
			BreakerTarget::Api => record.api_breaker = snapshot,
		}

		if let Err(err) = self.store.upsert(record).await {
			tracing::warn!(%tenant_id, %err, target = target.as_str(), "failed to persist breaker snapshot");
		}
	}

	/// Restores every active tenant's breaker state from its credential record, run once at
	/// startup before the broker serves traffic (§4.4).
	pub async fn restore_breakers(&self) {
		let Ok(tenant_ids) = self.store.list_active().await else {
			tracing::warn!("failed to list active tenants while restoring circuit breaker state");

			return;
		};

		for tenant_id in tenant_ids {
			let Ok(Some(record)) = self.store.get(&tenant_id).await else {
				continue;
			};

			self.breaker.restore(&tenant_id, BreakerTarget::Identity, record.identity_breaker);
			self.breaker.restore(&tenant_id, BreakerTarget::Api, record.api_breaker);
		}
	}

	/// Forces the cached access token to be treated as expired, used by the upstream adapter's
	/// one-retry-on-401 path (§4.6, §4.7). Does not itself trigger a refresh.
	pub async fn invalidate(&self, tenant_id: &TenantId) {
		if let Ok(Some(mut record)) = self.store.get(tenant_id).await {
			record.invalidate_access_token();

			if let Err(err) = self.store.upsert(record).await {
				tracing::warn!(
					%tenant_id,
					%err,
					"failed to persist forced access-token invalidation; stale token may still be served",
				);
			}
		}
	}

	fn guard_for(&self, tenant_id: &TenantId) -> Arc<AsyncMutex<()>> {
		self.refresh_guards.lock().entry(tenant_id.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
	}
}
