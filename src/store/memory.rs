//! Thread-safe in-memory [`CredentialStore`] implementation for local development and tests.
//! Loses all state on restart; never use this backend for production tenants (§4.2).

// self
use crate::{
	_prelude::*,
	auth::{CredentialRecord, TenantId},
	crypto::CipherBlob,
	store::{CompareAndSwapOutcome, CredentialStore, StoreFuture},
};

type RecordMap = Arc<RwLock<HashMap<TenantId, CredentialRecord>>>;

/// Storage backend that keeps credential records in-process for tests and demos.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(RecordMap);
impl MemoryStore {
	/// Builds an empty store.
	pub fn new() -> Self {
		Self::default()
	}

	fn get_now(map: RecordMap, tenant_id: TenantId) -> Option<CredentialRecord> {
		map.read().get(&tenant_id).cloned()
	}

	fn upsert_now(map: RecordMap, record: CredentialRecord) {
		map.write().insert(record.tenant_id.clone(), record);
	}

	fn cas_now(
		map: RecordMap,
		tenant_id: TenantId,
		expected_refresh_ciphertext: Option<CipherBlob>,
		replacement: CredentialRecord,
	) -> CompareAndSwapOutcome {
		let mut guard = map.write();
		let outcome = match guard.get(&tenant_id) {
			Some(existing) if existing.encrypted_refresh_token == expected_refresh_ciphertext =>
				CompareAndSwapOutcome::Updated,
			Some(_) => CompareAndSwapOutcome::RefreshMismatch,
			None => CompareAndSwapOutcome::Missing,
		};

		if matches!(outcome, CompareAndSwapOutcome::Updated) {
			guard.insert(tenant_id, replacement);
		}

		outcome
	}

	fn mark_needs_reauth_now(map: RecordMap, tenant_id: TenantId) -> Option<CredentialRecord> {
		let mut guard = map.write();
		let record = guard.get_mut(&tenant_id)?;

		record.mark_needs_reauth();

		Some(record.clone())
	}

	fn list_active_now(map: RecordMap) -> Vec<TenantId> {
		map.read()
			.values()
			.filter(|record| !record.needs_reauth)
			.map(|record| record.tenant_id.clone())
			.collect()
	}
}
impl CredentialStore for MemoryStore {
	fn get<'a>(&'a self, tenant_id: &'a TenantId) -> StoreFuture<'a, Option<CredentialRecord>> {
		let map = self.0.clone();
		let tenant_id = tenant_id.to_owned();

		Box::pin(async move { Ok(Self::get_now(map, tenant_id)) })
	}

	fn upsert(&self, record: CredentialRecord) -> StoreFuture<'_, ()> {
		let map = self.0.clone();

		Box::pin(async move {
			Self::upsert_now(map, record);

			Ok(())
		})
	}

	fn compare_and_swap_refresh<'a>(
		&'a self,
		tenant_id: &'a TenantId,
		expected_refresh_ciphertext: Option<&'a CipherBlob>,
		replacement: CredentialRecord,
	) -> StoreFuture<'a, CompareAndSwapOutcome> {
		let map = self.0.clone();
		let tenant_id = tenant_id.to_owned();
		let expected_refresh_ciphertext = expected_refresh_ciphertext.cloned();

		Box::pin(async move {
			Ok(Self::cas_now(map, tenant_id, expected_refresh_ciphertext, replacement))
		})
	}

	fn mark_needs_reauth<'a>(&'a self, tenant_id: &'a TenantId) -> StoreFuture<'a, Option<CredentialRecord>> {
		let map = self.0.clone();
		let tenant_id = tenant_id.to_owned();

		Box::pin(async move { Ok(Self::mark_needs_reauth_now(map, tenant_id)) })
	}

	fn list_active(&self) -> StoreFuture<'_, Vec<TenantId>> {
		let map = self.0.clone();

		Box::pin(async move { Ok(Self::list_active_now(map)) })
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::crypto::{CryptoBox, MasterKey};

	fn tenant() -> TenantId {
		TenantId::new("tenant-memory").unwrap()
	}

	fn crypto() -> CryptoBox {
		CryptoBox::new(MasterKey::from_bytes(&[3_u8; 32]).unwrap())
	}

	fn record(refresh: CipherBlob) -> CredentialRecord {
		CredentialRecord::builder(tenant()).refresh_token(refresh).build().unwrap()
	}

	#[tokio::test]
	async fn upsert_then_get_round_trips() {
		let store = MemoryStore::new();
		let refresh = crypto().encrypt(&tenant(), b"rt").unwrap();

		store.upsert(record(refresh)).await.unwrap();

		let fetched = store.get(&tenant()).await.unwrap();

		assert!(fetched.is_some());
		assert_eq!(fetched.unwrap().tenant_id, tenant());
	}

	#[tokio::test]
	async fn get_missing_tenant_returns_none() {
		let store = MemoryStore::new();

		assert!(store.get(&tenant()).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn cas_rejects_mismatched_refresh_secret() {
		let store = MemoryStore::new();
		let refresh = crypto().encrypt(&tenant(), b"rt-1").unwrap();
		let wrong = crypto().encrypt(&tenant(), b"rt-wrong").unwrap();

		store.upsert(record(refresh.clone())).await.unwrap();

		let outcome = store
			.compare_and_swap_refresh(&tenant(), Some(&wrong), record(refresh))
			.await
			.unwrap();

		assert_eq!(outcome, CompareAndSwapOutcome::RefreshMismatch);
	}

	#[tokio::test]
	async fn cas_accepts_matching_refresh_secret_and_rotates() {
		let store = MemoryStore::new();
		let refresh = crypto().encrypt(&tenant(), b"rt-1").unwrap();
		let rotated = crypto().encrypt(&tenant(), b"rt-2").unwrap();

		store.upsert(record(refresh.clone())).await.unwrap();

		let outcome = store
			.compare_and_swap_refresh(&tenant(), Some(&refresh), record(rotated.clone()))
			.await
			.unwrap();

		assert_eq!(outcome, CompareAndSwapOutcome::Updated);

		let fetched = store.get(&tenant()).await.unwrap().unwrap();

		assert_eq!(fetched.encrypted_refresh_token, Some(rotated));
	}

	#[tokio::test]
	async fn cas_on_missing_tenant_reports_missing() {
		let store = MemoryStore::new();
		let refresh = crypto().encrypt(&tenant(), b"rt").unwrap();

		let outcome =
			store.compare_and_swap_refresh(&tenant(), None, record(refresh)).await.unwrap();

		assert_eq!(outcome, CompareAndSwapOutcome::Missing);
	}

	#[tokio::test]
	async fn mark_needs_reauth_flips_flag_and_excludes_from_active_list() {
		let store = MemoryStore::new();
		let refresh = crypto().encrypt(&tenant(), b"rt").unwrap();

		store.upsert(record(refresh)).await.unwrap();

		assert_eq!(store.list_active().await.unwrap(), vec![tenant()]);

		let updated = store.mark_needs_reauth(&tenant()).await.unwrap().unwrap();

		assert!(updated.needs_reauth);
		assert!(store.list_active().await.unwrap().is_empty());
	}
}
