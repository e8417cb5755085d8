#![cfg(feature = "reqwest")]

//! Refresh singleflight, rate-cap, and durable-reauth scenarios (S2, S3).

// std
use std::sync::Arc;
// crates.io
use sdp_mcp_broker::{
    auth::{CredentialRecord, DataCenter, TenantId, TokenSecret, tenant::Tenant},
    breaker::{BreakerThresholds, CircuitBreaker},
    crypto::{CryptoBox, MasterKey},
    oauth_client::OAuthClient,
    rate::{RateCoordinator, RateThresholds},
    store::{CredentialStore, MemoryStore},
    token_manager::{TokenManager, TokenManagerError},
};
use time::{Duration, OffsetDateTime};
use url::Url;
// self
mod support;
use support::{FakeOAuthResponse, FakeOAuthTransport};

fn tenant() -> Tenant {
    Tenant {
        id: TenantId::new("tenant-refresh").unwrap(),
        data_center: DataCenter::Us,
        base_url: Url::parse("https://sdpondemand.manageengine.com").unwrap(),
        instance: "itdesk".into(),
        client_id: "client-id".into(),
        client_secret: TokenSecret::new("client-secret"),
    }
}

fn crypto() -> Arc<CryptoBox> {
    Arc::new(CryptoBox::new(MasterKey::from_bytes(&[7_u8; 32]).unwrap()))
}

async fn seed_expired_record(store: &Arc<dyn CredentialStore>, crypto: &Arc<CryptoBox>, tenant: &Tenant) {
    let refresh = crypto.encrypt(&tenant.id, b"refresh-token").unwrap();
    let record = CredentialRecord::builder(tenant.id.clone()).refresh_token(refresh).build().unwrap();

    store.upsert(record).await.unwrap();
}

fn build_manager(
    store: Arc<dyn CredentialStore>,
    crypto_box: Arc<CryptoBox>,
    oauth_response: FakeOAuthResponse,
) -> (TokenManager<FakeOAuthTransport>, FakeOAuthTransport) {
    let transport = FakeOAuthTransport::new(oauth_response);
    let oauth = Arc::new(OAuthClient::new(transport.clone()));
    let manager = TokenManager::new(
        store,
        crypto_box,
        Arc::new(RateCoordinator::new(RateThresholds::default())),
        Arc::new(CircuitBreaker::new(BreakerThresholds::default())),
        oauth,
    );

    (manager, transport)
}

#[tokio::test]
async fn concurrent_callers_trigger_exactly_one_refresh_round_trip() {
    let tenant = tenant();
    let crypto_box = crypto();
    let store: Arc<dyn CredentialStore> = Arc::new(MemoryStore::new());

    seed_expired_record(&store, &crypto_box, &tenant).await;

    let (manager, transport) = build_manager(store, crypto_box, FakeOAuthResponse::refresh_success());
    let manager = Arc::new(manager);

    let mut calls = Vec::new();

    for _ in 0..100 {
        let manager = Arc::clone(&manager);
        let tenant = tenant.clone();

        calls.push(tokio::spawn(async move { manager.get_access_token(&tenant).await }));
    }

    for call in calls {
        let token = call.await.expect("task should not panic").expect("refresh should succeed");

        assert_eq!(token.secret.expose(), "fake-access-2");
    }

    assert_eq!(transport.call_count(), 1, "singleflight should collapse concurrent refreshes into one call");
}

#[tokio::test]
async fn invalid_grant_marks_tenant_as_needing_reauth_and_stops_retrying() {
    let tenant = tenant();
    let crypto_box = crypto();
    let store: Arc<dyn CredentialStore> = Arc::new(MemoryStore::new());

    seed_expired_record(&store, &crypto_box, &tenant).await;

    let (manager, transport) = build_manager(store.clone(), crypto_box, FakeOAuthResponse::invalid_grant());

    let err = manager.get_access_token(&tenant).await.unwrap_err();

    assert!(matches!(err, TokenManagerError::NeedsReauth));
    assert_eq!(transport.call_count(), 1);

    let record = store.get(&tenant.id).await.unwrap().expect("record should still exist");

    assert!(record.needs_reauth);

    // A second attempt must short-circuit on the persisted flag rather than calling the
    // identity provider again.
    let err = manager.get_access_token(&tenant).await.unwrap_err();

    assert!(matches!(err, TokenManagerError::NeedsReauth));
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn fresh_token_short_circuits_without_any_refresh_call() {
    let tenant = tenant();
    let crypto_box = crypto();
    let now = OffsetDateTime::now_utc();
    let access = crypto_box.encrypt(&tenant.id, b"still-fresh").unwrap();
    let refresh = crypto_box.encrypt(&tenant.id, b"refresh-token").unwrap();
    let record = CredentialRecord::builder(tenant.id.clone())
        .refresh_token(refresh)
        .access_token(access, now + Duration::seconds(3600))
        .build()
        .unwrap();
    let store: Arc<dyn CredentialStore> = Arc::new(MemoryStore::new());

    store.upsert(record).await.unwrap();

    let (manager, transport) = build_manager(store, crypto_box, FakeOAuthResponse::refresh_success());
    let token = manager.get_access_token(&tenant).await.unwrap();

    assert_eq!(token.secret.expose(), "still-fresh");
    assert_eq!(transport.call_count(), 0);
}
