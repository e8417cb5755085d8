//! Shared fake identity-provider transport for integration tests that exercise
//! [`sdp_mcp_broker::token_manager::TokenManager`] and [`sdp_mcp_broker::session::SessionManager`]
//! without touching the network: the identity provider's token endpoint is fixed per data center
//! (`DataCenter::token_endpoint`), so unlike the upstream REST API it cannot be pointed at a mock
//! HTTP server and is instead faked at the `TokenHttpClient` seam the same way
//! `token_manager.rs`'s own `NoopHttpClient` test double does.
#![cfg(feature = "reqwest")]
#![allow(dead_code)]

// std
use std::{
	future::Future,
	pin::Pin,
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
};
// crates.io
use oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse, http::StatusCode};
// self
use sdp_mcp_broker::http::{ResponseMetadata, ResponseMetadataSlot, TokenHttpClient};

/// Canned response to hand back on every call.
#[derive(Clone)]
pub struct FakeOAuthResponse {
	pub status: u16,
	pub body: &'static str,
}
impl FakeOAuthResponse {
	pub fn exchange_success() -> Self {
		Self {
			status: 200,
			body: r#"{"access_token":"fake-access-1","refresh_token":"fake-refresh-1","token_type":"bearer","expires_in":3600,"scope":"requests:read requests:write metadata:read"}"#,
		}
	}

	pub fn refresh_success() -> Self {
		Self {
			status: 200,
			body: r#"{"access_token":"fake-access-2","token_type":"bearer","expires_in":3600}"#,
		}
	}

	pub fn invalid_grant() -> Self {
		Self { status: 400, body: r#"{"error":"invalid_grant"}"# }
	}
}

/// Fake identity-provider transport that counts how many times it is invoked, so singleflight
/// and rate-cap assertions can check the exact number of identity round trips.
#[derive(Clone)]
pub struct FakeOAuthTransport {
	pub calls: Arc<AtomicUsize>,
	response: FakeOAuthResponse,
}
impl FakeOAuthTransport {
	pub fn new(response: FakeOAuthResponse) -> Self {
		Self { calls: Arc::new(AtomicUsize::new(0)), response }
	}

	pub fn call_count(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}
impl TokenHttpClient for FakeOAuthTransport {
	type Handle = FakeOAuthHandle;
	type TransportError = std::io::Error;

	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle {
		FakeOAuthHandle { slot, calls: Arc::clone(&self.calls), response: self.response.clone() }
	}
}

pub struct FakeOAuthHandle {
	slot: ResponseMetadataSlot,
	calls: Arc<AtomicUsize>,
	response: FakeOAuthResponse,
}
impl<'c> AsyncHttpClient<'c> for FakeOAuthHandle {
	type Error = HttpClientError<std::io::Error>;
	type Future = Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send + Sync>>;

	fn call(&'c self, _request: HttpRequest) -> Self::Future {
		self.calls.fetch_add(1, Ordering::SeqCst);

		let slot = self.slot.clone();
		let status = self.response.status;
		let body = self.response.body.as_bytes().to_vec();

		Box::pin(async move {
			slot.take();
			slot.store(ResponseMetadata { status: Some(status), retry_after: None });

			let mut response = HttpResponse::new(body);

			*response.status_mut() = StatusCode::from_u16(status).expect("Fake status code is valid.");
			response.headers_mut().insert(
				oauth2::http::header::CONTENT_TYPE,
				"application/json".parse().expect("Static content-type header is valid."),
			);

			Ok(response)
		})
	}
}
