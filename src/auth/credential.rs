//! The one-per-tenant credential record TokenManager reads and rewrites.

// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TenantId},
	breaker::BreakerSnapshot,
	crypto::CipherBlob,
};

/// Errors raised while building a [`CredentialRecord`].
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum CredentialRecordError {
	/// A record was built without ever having completed initial OAuth setup.
	#[error("Credential record requires an encrypted refresh token unless needs_reauth is set.")]
	MissingRefreshToken,
	/// `access_token_expires_at` was built in the past relative to `last_refresh`.
	#[error("Access token expiry must not precede the last refresh timestamp.")]
	ExpiryBeforeLastRefresh,
}

/// One per tenant. Mutated only by TokenManager under the tenant's refresh mutex (§3, §5).
#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
	/// Owning tenant.
	pub tenant_id: TenantId,
	/// Encrypted current access token, if one has ever been issued.
	pub encrypted_access_token: Option<CipherBlob>,
	/// Encrypted refresh token. Absent only before initial setup completes.
	pub encrypted_refresh_token: Option<CipherBlob>,
	/// Expiry of the current access token.
	pub access_token_expires_at: OffsetDateTime,
	/// Scopes granted at the most recent successful exchange.
	pub scope: ScopeSet,
	/// When set, the access token must be treated as invalid regardless of expiry.
	pub needs_reauth: bool,
	/// Timestamp of the most recent successful refresh, if any.
	pub last_refresh: Option<OffsetDateTime>,
	/// Consecutive refresh/API failures since the last success, used by the breaker.
	pub consecutive_failure_count: u32,
	/// Breaker state for the identity provider, persisted so restarts keep protection.
	pub identity_breaker: BreakerSnapshot,
	/// Breaker state for the SaaS API, persisted so restarts keep protection.
	pub api_breaker: BreakerSnapshot,
}
impl CredentialRecord {
	/// Starts a builder for a freshly onboarded tenant.
	pub fn builder(tenant_id: TenantId) -> CredentialRecordBuilder {
		CredentialRecordBuilder::new(tenant_id)
	}

	/// True when the cached access token is usable at `now` under `safety_margin`.
	///
	/// Returns `false` unconditionally once `needs_reauth` is set (§3 invariant).
	pub fn access_token_fresh(&self, now: OffsetDateTime, safety_margin: Duration) -> bool {
		!self.needs_reauth
			&& self.encrypted_access_token.is_some()
			&& self.access_token_expires_at > now + safety_margin
	}

	/// True when there is no refresh token to exchange, or reauth has already been flagged.
	pub fn requires_reauth(&self) -> bool {
		self.needs_reauth || self.encrypted_refresh_token.is_none()
	}

	/// Applies a successful refresh: new access token, new expiry, optionally rotated refresh
	/// token, cleared failure counter.
	pub fn apply_refresh(
		&mut self,
		access_token: CipherBlob,
		expires_at: OffsetDateTime,
		rotated_refresh_token: Option<CipherBlob>,
		refreshed_at: OffsetDateTime,
	) {
		self.encrypted_access_token = Some(access_token);
		self.access_token_expires_at = expires_at;

		if let Some(rotated) = rotated_refresh_token {
			self.encrypted_refresh_token = Some(rotated);
		}

		self.last_refresh = Some(refreshed_at);
		self.consecutive_failure_count = 0;
		self.needs_reauth = false;
	}

	/// Flags the tenant for re-authorization after a durable grant failure
	/// (`invalid_grant`/`invalid_code`). Does not touch the failure counter, since this is not
	/// a transient/breaker-relevant failure (§4.6).
	pub fn mark_needs_reauth(&mut self) {
		self.needs_reauth = true;
	}

	/// Forces the cached access token to be treated as expired, used by the one-retry-on-401
	/// path in the upstream adapter (§4.6, §4.7). Does not touch the refresh token or
	/// `needs_reauth`.
	pub fn invalidate_access_token(&mut self) {
		self.access_token_expires_at = OffsetDateTime::UNIX_EPOCH;
	}

	/// Increments the transient-failure counter, used outside the breaker for observability.
	pub fn record_failure(&mut self) {
		self.consecutive_failure_count = self.consecutive_failure_count.saturating_add(1);
	}
}
impl Debug for CredentialRecord {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialRecord")
			.field("tenant_id", &self.tenant_id)
			.field("has_access_token", &self.encrypted_access_token.is_some())
			.field("has_refresh_token", &self.encrypted_refresh_token.is_some())
			.field("access_token_expires_at", &self.access_token_expires_at)
			.field("scope", &self.scope)
			.field("needs_reauth", &self.needs_reauth)
			.field("last_refresh", &self.last_refresh)
			.field("consecutive_failure_count", &self.consecutive_failure_count)
			.finish()
	}
}

/// Builder for [`CredentialRecord`], used once at initial OAuth setup.
#[derive(Debug)]
pub struct CredentialRecordBuilder {
	tenant_id: TenantId,
	encrypted_access_token: Option<CipherBlob>,
	encrypted_refresh_token: Option<CipherBlob>,
	access_token_expires_at: Option<OffsetDateTime>,
	scope: Option<ScopeSet>,
	needs_reauth: bool,
}
impl CredentialRecordBuilder {
	fn new(tenant_id: TenantId) -> Self {
		Self {
			tenant_id,
			encrypted_access_token: None,
			encrypted_refresh_token: None,
			access_token_expires_at: None,
			scope: None,
			needs_reauth: false,
		}
	}

	/// Sets the encrypted access token.
	pub fn access_token(mut self, blob: CipherBlob, expires_at: OffsetDateTime) -> Self {
		self.encrypted_access_token = Some(blob);
		self.access_token_expires_at = Some(expires_at);

		self
	}

	/// Sets the encrypted refresh token.
	pub fn refresh_token(mut self, blob: CipherBlob) -> Self {
		self.encrypted_refresh_token = Some(blob);

		self
	}

	/// Sets the granted scope set.
	pub fn scope(mut self, scope: ScopeSet) -> Self {
		self.scope = Some(scope);

		self
	}

	/// Marks the record as already needing reauth (e.g. a restore from a tamper-detected blob).
	pub fn needs_reauth(mut self, value: bool) -> Self {
		self.needs_reauth = value;

		self
	}

	/// Validates and builds the record.
	pub fn build(self) -> Result<CredentialRecord, CredentialRecordError> {
		if self.encrypted_refresh_token.is_none() && !self.needs_reauth {
			return Err(CredentialRecordError::MissingRefreshToken);
		}

		Ok(CredentialRecord {
			tenant_id: self.tenant_id,
			encrypted_access_token: self.encrypted_access_token,
			encrypted_refresh_token: self.encrypted_refresh_token,
			access_token_expires_at: self.access_token_expires_at.unwrap_or(OffsetDateTime::UNIX_EPOCH),
			scope: self.scope.unwrap_or_default(),
			needs_reauth: self.needs_reauth,
			last_refresh: None,
			consecutive_failure_count: 0,
			identity_breaker: BreakerSnapshot::default(),
			api_breaker: BreakerSnapshot::default(),
		})
	}
}
