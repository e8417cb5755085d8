//! In-memory registry of onboarded tenants, keyed both by tenant id and by the client
//! credential pair presented on `GET /sse` (§4.9, §6).
//!
//! Distinct from [`CredentialStore`](crate::store::CredentialStore): the store only ever holds
//! encrypted token material and breaker snapshots, never the connection details a tenant
//! supplies once at onboarding.

// self
use crate::{
	_prelude::*,
	auth::{TenantId, tenant::Tenant},
};

/// Holds every onboarded [`Tenant`], resolvable by id or by the credential header pair used to
/// open an SSE session.
#[derive(Default)]
pub struct TenantDirectory {
	by_id: RwLock<HashMap<TenantId, Tenant>>,
	by_client_id: RwLock<HashMap<String, TenantId>>,
}
impl TenantDirectory {
	/// Builds an empty directory.
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers or replaces a tenant record, indexing it by client id for credential lookup.
	pub fn register(&self, tenant: Tenant) {
		let tenant_id = tenant.id.clone();
		let client_id = tenant.client_id.clone();

		self.by_id.write().insert(tenant_id.clone(), tenant);
		self.by_client_id.write().insert(client_id, tenant_id);
	}

	/// Looks up a tenant by its stable id.
	pub fn get(&self, tenant_id: &TenantId) -> Option<Tenant> {
		self.by_id.read().get(tenant_id).cloned()
	}

	/// Resolves a tenant from the credential header pair presented on `GET /sse`.
	///
	/// Returns `None` on an unknown client id or a secret mismatch; callers must not distinguish
	/// the two cases in the HTTP response (§4.9: "Reject with HTTP 401 if absent or unknown").
	pub fn resolve_by_credentials(&self, client_id: &str, client_secret: &str) -> Option<Tenant> {
		let tenant_id = self.by_client_id.read().get(client_id).cloned()?;
		let tenant = self.by_id.read().get(&tenant_id).cloned()?;

		if tenant.client_secret.expose() == client_secret { Some(tenant) } else { None }
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::auth::{TokenSecret, tenant::DataCenter};

	fn tenant(id: &str, client_id: &str, secret: &str) -> Tenant {
		Tenant {
			id: TenantId::new(id).unwrap(),
			data_center: DataCenter::Us,
			base_url: Url::parse("https://sdpondemand.manageengine.com").unwrap(),
			instance: "acme".into(),
			client_id: client_id.into(),
			client_secret: TokenSecret::new(secret),
		}
	}

	#[test]
	fn resolves_by_matching_credential_pair() {
		let directory = TenantDirectory::new();

		directory.register(tenant("tenant-1", "1000.XYZ", "s3cr3t"));

		let resolved = directory.resolve_by_credentials("1000.XYZ", "s3cr3t").unwrap();

		assert_eq!(resolved.id.as_ref(), "tenant-1");
	}

	#[test]
	fn rejects_unknown_client_id_and_secret_mismatch() {
		let directory = TenantDirectory::new();

		directory.register(tenant("tenant-1", "1000.XYZ", "s3cr3t"));

		assert!(directory.resolve_by_credentials("unknown", "s3cr3t").is_none());
		assert!(directory.resolve_by_credentials("1000.XYZ", "wrong").is_none());
	}

	#[test]
	fn registering_the_same_id_again_replaces_the_record() {
		let directory = TenantDirectory::new();

		directory.register(tenant("tenant-1", "1000.XYZ", "old-secret"));
		directory.register(tenant("tenant-1", "1000.XYZ", "new-secret"));

		assert!(directory.resolve_by_credentials("1000.XYZ", "old-secret").is_none());
		assert!(directory.resolve_by_credentials("1000.XYZ", "new-secret").is_some());
	}
}
