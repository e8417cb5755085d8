//! Storage contracts and built-in store implementations for tenant credential records.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{_prelude::*, auth::CredentialRecord, auth::TenantId};

/// Boxed future returned by [`CredentialStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Persistence contract for tenant credential records.
///
/// Implementations accept already-encrypted blobs; the store performs no cryptography itself
/// (§4.2). `upsert` must be atomic with respect to concurrent readers: a reader either sees the
/// prior record entirely or the new one, never a torn mix of the two.
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Fetches the record for `tenant_id`, if one exists.
	fn get<'a>(&'a self, tenant_id: &'a TenantId) -> StoreFuture<'a, Option<CredentialRecord>>;

	/// Inserts or atomically replaces the record for `tenant_id`.
	fn upsert(&self, record: CredentialRecord) -> StoreFuture<'_, ()>;

	/// Atomically rotates the refresh token if the expected secret matches the stored one.
	fn compare_and_swap_refresh<'a>(
		&'a self,
		tenant_id: &'a TenantId,
		expected_refresh_ciphertext: Option<&'a crate::crypto::CipherBlob>,
		replacement: CredentialRecord,
	) -> StoreFuture<'a, CompareAndSwapOutcome>;

	/// Flags a tenant as needing re-authorization without touching the rest of the record.
	fn mark_needs_reauth<'a>(&'a self, tenant_id: &'a TenantId) -> StoreFuture<'a, Option<CredentialRecord>>;

	/// Lists tenants whose credential record does not require reauth, for the proactive
	/// refresh loop (§4.6).
	fn list_active(&self) -> StoreFuture<'_, Vec<TenantId>>;
}

/// Result of a refresh-token compare-and-swap attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareAndSwapOutcome {
	/// The refresh secret matched the expected value and the record was updated.
	Updated,
	/// The record exists but the expected refresh secret did not match.
	RefreshMismatch,
	/// No record matched the provided tenant id.
	Missing,
}

/// Error type produced by [`CredentialStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures (e.g., serde) surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine. Callers should treat this as retryable.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::error::Error;
	use std::error::Error as StdError;

	#[test]
	fn store_error_converts_into_broker_error_with_source() {
		let store_error = StoreError::Backend { message: "database unreachable".into() };
		let broker_error: Error = store_error.clone().into();

		assert!(matches!(broker_error, Error::Storage(_)));
		assert!(broker_error.to_string().contains("database unreachable"));

		let source = StdError::source(&broker_error)
			.expect("Broker error should expose the original store error as its source.");

		assert_eq!(source.to_string(), store_error.to_string());
	}

	#[test]
	fn compare_and_swap_outcome_can_be_serialized() {
		let payload = serde_json::to_string(&CompareAndSwapOutcome::Updated)
			.expect("CompareAndSwapOutcome should serialize to JSON.");

		assert_eq!(payload, "\"Updated\"");

		let round_trip: CompareAndSwapOutcome = serde_json::from_str(&payload)
			.expect("Serialized outcome should deserialize from JSON.");

		assert_eq!(round_trip, CompareAndSwapOutcome::Updated);
	}
}
