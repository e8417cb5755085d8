//! Stateless exchange of authorization codes and refresh tokens against the identity
//! provider's token endpoint (§4.5).

// crates.io
use oauth2::{
	AuthorizationCode, ClientId, ClientSecret, EndpointNotSet, EndpointSet, RedirectUrl,
	RefreshToken, RequestTokenError, RevocationUrl, StandardRevocableToken, TokenResponse,
	TokenUrl,
	basic::{BasicClient, BasicErrorResponseType},
};
// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenSecret, tenant::Tenant},
	error::TransientError,
	http::{ResponseMetadataSlot, TokenHttpClient},
};

/// Lower bound on `expires_in` accepted from the identity provider (§4.5).
const MIN_EXPIRES_IN: i64 = 60;
/// Upper bound on `expires_in` accepted from the identity provider (§4.5).
const MAX_EXPIRES_IN: i64 = 24 * 60 * 60;
/// Fallback wait suggested when the provider signals rate limiting without a `Retry-After`.
const DEFAULT_RATE_LIMIT_RETRY: Duration = Duration::seconds(60);

/// Successful outcome of [`OAuthClient::exchange_code`].
#[derive(Clone, Debug)]
pub struct ExchangeCodeOutcome {
	/// Newly issued access token.
	pub access_token: TokenSecret,
	/// Refresh token, present for every authorization-code exchange.
	pub refresh_token: TokenSecret,
	/// Absolute expiry of `access_token`, clamped per §4.5.
	pub expires_at: OffsetDateTime,
	/// Scopes actually granted (the provider may narrow the requested set).
	pub scope: ScopeSet,
}

/// Successful outcome of [`OAuthClient::refresh`].
#[derive(Clone, Debug)]
pub struct RefreshOutcome {
	/// Newly issued access token.
	pub access_token: TokenSecret,
	/// Rotated refresh token, if the provider issued one.
	pub refresh_token: Option<TokenSecret>,
	/// Absolute expiry of `access_token`, clamped per §4.5.
	pub expires_at: OffsetDateTime,
}

/// Classified outcome of a token-endpoint round trip (§4.5).
#[derive(Debug, ThisError)]
pub enum OAuthError {
	/// `invalid_code`: the authorization code was wrong, expired, or already used.
	#[error("Authorization code was rejected by the identity provider.")]
	InvalidCode,
	/// `invalid_client`: the tenant's client id/secret pair is no longer valid.
	#[error("Client credentials were rejected by the identity provider.")]
	InvalidClient,
	/// `invalid_grant`: the refresh token was revoked or expired.
	#[error("Refresh token was rejected by the identity provider.")]
	InvalidGrant,
	/// The provider signalled rate limiting; count as a transient breaker failure.
	#[error("Identity provider rate limit encountered.")]
	RateLimited {
		/// Suggested wait before retrying.
		retry_after: Duration,
	},
	/// Network failure, 5xx, or a response this client could not parse.
	#[error(transparent)]
	Transient(#[from] TransientError),
}
impl OAuthError {
	/// True for the durable authorization failures that must flip `needs_reauth` rather than
	/// count against the identity circuit breaker (§4.6 step 6).
	pub fn is_durable_auth_failure(&self) -> bool {
		matches!(self, Self::InvalidCode | Self::InvalidClient | Self::InvalidGrant)
	}
}

/// Stateless OAuth 2.0 client for the identity provider's token endpoint.
///
/// Holds no per-tenant state; [`TokenManager`](crate::token_manager::TokenManager) is the only
/// caller and owns all persistence and rate-limiting decisions.
pub struct OAuthClient<H> {
	http: H,
}
impl<H> OAuthClient<H>
where
	H: TokenHttpClient,
{
	/// Builds a client around an injectable HTTP transport.
	pub fn new(http: H) -> Self {
		Self { http }
	}

	/// Exchanges a one-time authorization code for an access/refresh token pair.
	pub async fn exchange_code(
		&self,
		tenant: &Tenant,
		code: &str,
		redirect_uri: &Url,
	) -> Result<ExchangeCodeOutcome, OAuthError> {
		let client = self.basic_client(tenant)?.set_redirect_uri(
			RedirectUrl::new(redirect_uri.to_string())
				.map_err(|e| OAuthError::Transient(TransientError::TokenEndpoint {
					message: e.to_string(),
					status: None,
					retry_after: None,
				}))?,
		);
		let slot = ResponseMetadataSlot::default();
		let handle = self.http.with_metadata(slot.clone());
		let result = client
			.exchange_code(AuthorizationCode::new(code.to_owned()))
			.request_async(&handle)
			.await;

		let response = Self::classify(result, &slot)?;
		let expires_at = Self::clamp_expiry(response.expires_in());
		let refresh_token = response
			.refresh_token()
			.map(|rt| TokenSecret::new(rt.secret().clone()))
			.ok_or_else(|| OAuthError::Transient(TransientError::TokenEndpoint {
				message: "Identity provider did not return a refresh token.".into(),
				status: slot.take().and_then(|m| m.status),
				retry_after: None,
			}))?;
		let scope = response
			.scopes()
			.map(|scopes| {
				ScopeSet::new(scopes.iter().map(|scope| scope.as_ref().to_owned()))
					.unwrap_or_default()
			})
			.unwrap_or_default();

		Ok(ExchangeCodeOutcome {
			access_token: TokenSecret::new(response.access_token().secret().clone()),
			refresh_token,
			expires_at,
			scope,
		})
	}

	/// Refreshes an access token, optionally rotating the refresh token.
	pub async fn refresh(
		&self,
		tenant: &Tenant,
		refresh_token: &TokenSecret,
	) -> Result<RefreshOutcome, OAuthError> {
		let client = self.basic_client(tenant)?;
		let slot = ResponseMetadataSlot::default();
		let handle = self.http.with_metadata(slot.clone());
		let result = client
			.exchange_refresh_token(&RefreshToken::new(refresh_token.expose().to_owned()))
			.request_async(&handle)
			.await;

		let response = Self::classify(result, &slot)?;
		let expires_at = Self::clamp_expiry(response.expires_in());
		let refresh_token = response.refresh_token().map(|rt| TokenSecret::new(rt.secret().clone()));

		Ok(RefreshOutcome {
			access_token: TokenSecret::new(response.access_token().secret().clone()),
			refresh_token,
			expires_at,
		})
	}

	/// Revokes a token at the identity provider, best-effort.
	pub async fn revoke(&self, tenant: &Tenant, token: &TokenSecret) -> Result<(), OAuthError> {
		let client = self
			.basic_client(tenant)?
			.set_revocation_url(
				RevocationUrl::new(format!(
					"https://accounts.zoho.{}/oauth/v2/token/revoke",
					tenant.data_center.tld()
				))
				.expect("Revocation URL is built from a fixed, validated template."),
			);
		let slot = ResponseMetadataSlot::default();
		let handle = self.http.with_metadata(slot.clone());
		let revocable = StandardRevocableToken::RefreshToken(RefreshToken::new(token.expose().to_owned()));

		let result = client
			.revoke_token(revocable)
			.map_err(|e| {
				OAuthError::Transient(TransientError::TokenEndpoint {
					message: e.to_string(),
					status: None,
					retry_after: None,
				})
			})?
			.request_async(&handle)
			.await;

		if let Err(e) = result {
			let metadata = slot.take().unwrap_or_default();

			return Err(OAuthError::Transient(TransientError::TokenEndpoint {
				message: e.to_string(),
				status: metadata.status,
				retry_after: metadata.retry_after,
			}));
		}

		Ok(())
	}

	fn basic_client(
		&self,
		tenant: &Tenant,
	) -> Result<
		BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>,
		OAuthError,
	> {
		let token_url = tenant.data_center.token_endpoint();

		Ok(BasicClient::new(ClientId::new(tenant.client_id.clone()))
			.set_client_secret(ClientSecret::new(tenant.client_secret.expose().to_owned()))
			.set_token_uri(TokenUrl::new(token_url.to_string()).map_err(|e| {
				OAuthError::Transient(TransientError::TokenEndpoint {
					message: e.to_string(),
					status: None,
					retry_after: None,
				})
			})?))
	}

	fn clamp_expiry(expires_in: Option<std::time::Duration>) -> OffsetDateTime {
		let seconds = expires_in.map(|d| d.as_secs() as i64).unwrap_or(MIN_EXPIRES_IN);
		let clamped = seconds.clamp(MIN_EXPIRES_IN, MAX_EXPIRES_IN);

		OffsetDateTime::now_utc() + Duration::seconds(clamped)
	}

	fn classify<T, RE>(
		result: Result<T, RequestTokenError<RE, oauth2::StandardErrorResponse<BasicErrorResponseType>>>,
		slot: &ResponseMetadataSlot,
	) -> Result<T, OAuthError>
	where
		RE: StdError + 'static,
	{
		result.map_err(|e| Self::classify_transport_error(&e, slot))
	}

	fn classify_transport_error<RE>(
		error: &RequestTokenError<RE, oauth2::StandardErrorResponse<BasicErrorResponseType>>,
		slot: &ResponseMetadataSlot,
	) -> OAuthError
	where
		RE: StdError + 'static,
	{
		let metadata = slot.take().unwrap_or_default();

		match error {
			RequestTokenError::ServerResponse(response) => match response.error() {
				BasicErrorResponseType::InvalidGrant => OAuthError::InvalidGrant,
				BasicErrorResponseType::InvalidClient => OAuthError::InvalidClient,
				BasicErrorResponseType::Extension(code) if code == "invalid_code" =>
					OAuthError::InvalidCode,
				BasicErrorResponseType::Extension(code)
					if code.contains("too_many_requests") || code.contains("rate_limit") =>
					OAuthError::RateLimited {
						retry_after: metadata.retry_after.unwrap_or(DEFAULT_RATE_LIMIT_RETRY),
					},
				_ => OAuthError::Transient(TransientError::TokenEndpoint {
					message: response.error_description().cloned().unwrap_or_default(),
					status: metadata.status,
					retry_after: metadata.retry_after,
				}),
			},
			_ if metadata.status == Some(429) => OAuthError::RateLimited {
				retry_after: metadata.retry_after.unwrap_or(DEFAULT_RATE_LIMIT_RETRY),
			},
			other => OAuthError::Transient(TransientError::TokenEndpoint {
				message: other.to_string(),
				status: metadata.status,
				retry_after: metadata.retry_after,
			}),
		}
	}
}
