//! Simple file-backed [`CredentialStore`] for single-node deployments.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	auth::{CredentialRecord, TenantId},
	crypto::CipherBlob,
	store::{CompareAndSwapOutcome, CredentialStore, StoreError, StoreFuture},
};

/// Persists credential records to a JSON file after each mutation.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	inner: Arc<RwLock<HashMap<TenantId, CredentialRecord>>>,
}
impl FileStore {
	/// Opens (or creates) a store at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		let snapshot = if path.exists() { Self::load_snapshot(&path)? } else { HashMap::new() };

		Ok(Self { path, inner: Arc::new(RwLock::new(snapshot)) })
	}

	fn load_snapshot(path: &Path) -> Result<HashMap<TenantId, CredentialRecord>, StoreError> {
		if !path.exists() {
			return Ok(HashMap::new());
		}

		let metadata = path.metadata().map_err(|e| StoreError::Backend {
			message: format!("Failed to inspect {}: {e}", path.display()),
		})?;

		if metadata.len() == 0 {
			return Ok(HashMap::new());
		}

		let bytes = fs::read(path).map_err(|e| StoreError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;

		let entries: Vec<CredentialRecord> =
			serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
				message: format!("Failed to parse {}: {e}", path.display()),
			})?;

		Ok(entries.into_iter().map(|record| (record.tenant_id.clone(), record)).collect())
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create store directory {}: {e}", parent.display()),
			})?;
		}
		Ok(())
	}

	fn persist_locked(&self, contents: &HashMap<TenantId, CredentialRecord>) -> Result<(), StoreError> {
		Self::ensure_parent_exists(&self.path)?;

		let snapshot: Vec<_> = contents.values().collect();
		let serialized =
			serde_json::to_vec_pretty(&snapshot).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize store snapshot: {e}"),
			})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}
}
impl CredentialStore for FileStore {
	fn get<'a>(&'a self, tenant_id: &'a TenantId) -> StoreFuture<'a, Option<CredentialRecord>> {
		Box::pin(async move { Ok(self.inner.read().get(tenant_id).cloned()) })
	}

	fn upsert(&self, record: CredentialRecord) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			let mut guard = self.inner.write();

			guard.insert(record.tenant_id.clone(), record);
			self.persist_locked(&guard)?;

			Ok(())
		})
	}

	fn compare_and_swap_refresh<'a>(
		&'a self,
		tenant_id: &'a TenantId,
		expected_refresh_ciphertext: Option<&'a CipherBlob>,
		replacement: CredentialRecord,
	) -> StoreFuture<'a, CompareAndSwapOutcome> {
		Box::pin(async move {
			let mut guard = self.inner.write();
			let outcome = match guard.get(tenant_id) {
				Some(existing) if existing.encrypted_refresh_token.as_ref() == expected_refresh_ciphertext =>
					CompareAndSwapOutcome::Updated,
				Some(_) => CompareAndSwapOutcome::RefreshMismatch,
				None => CompareAndSwapOutcome::Missing,
			};

			if matches!(outcome, CompareAndSwapOutcome::Updated) {
				guard.insert(tenant_id.clone(), replacement);
				self.persist_locked(&guard)?;
			}

			Ok(outcome)
		})
	}

	fn mark_needs_reauth<'a>(&'a self, tenant_id: &'a TenantId) -> StoreFuture<'a, Option<CredentialRecord>> {
		Box::pin(async move {
			let mut guard = self.inner.write();
			let result = match guard.get_mut(tenant_id) {
				Some(record) => {
					record.mark_needs_reauth();

					let cloned = record.clone();

					self.persist_locked(&guard)?;

					Some(cloned)
				},
				None => None,
			};

			Ok(result)
		})
	}

	fn list_active(&self) -> StoreFuture<'_, Vec<TenantId>> {
		Box::pin(async move {
			Ok(self
				.inner
				.read()
				.values()
				.filter(|record| !record.needs_reauth)
				.map(|record| record.tenant_id.clone())
				.collect())
		})
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, process};
	// crates.io
	use tokio::runtime::Runtime;
	// self
	use super::*;
	use crate::crypto::{CryptoBox, MasterKey};

	fn temp_path() -> PathBuf {
		let unique = format!(
			"sdp_mcp_broker_file_store_{}_{}.json",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		);

		env::temp_dir().join(unique)
	}

	fn build_record() -> (TenantId, CredentialRecord) {
		let tenant = TenantId::new("tenant-demo").expect("Failed to build tenant fixture.");
		let crypto = CryptoBox::new(MasterKey::from_bytes(&[9_u8; 32]).unwrap());
		let refresh = crypto.encrypt(&tenant, b"refresh-secret").unwrap();
		let record =
			CredentialRecord::builder(tenant.clone()).refresh_token(refresh).build().unwrap();

		(tenant, record)
	}

	#[test]
	fn save_and_reload_round_trip() {
		let path = temp_path();
		let store = FileStore::open(&path).expect("Failed to open file store snapshot.");
		let (tenant, record) = build_record();
		let rt = Runtime::new().expect("Failed to build Tokio runtime for file store test.");

		rt.block_on(store.upsert(record.clone())).expect("Failed to save fixture record.");
		drop(store);

		let reopened = FileStore::open(&path).expect("Failed to reopen file store snapshot.");
		let fetched = rt
			.block_on(reopened.get(&tenant))
			.expect("Failed to fetch fixture record from file store.")
			.expect("File store lost record after reopen.");

		assert_eq!(fetched.encrypted_refresh_token, record.encrypted_refresh_token);

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary file store snapshot {}: {e}", path.display())
		});
	}

	#[test]
	fn opening_a_missing_path_starts_empty() {
		let path = temp_path();
		let store = FileStore::open(&path).expect("Failed to open file store at a fresh path.");
		let rt = Runtime::new().expect("Failed to build Tokio runtime for file store test.");

		assert!(rt.block_on(store.list_active()).unwrap().is_empty());
	}
}
