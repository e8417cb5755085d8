//! Per-tenant cache of upstream enumerations (categories, subcategories, priorities, closure
//! codes) used to resolve reference fields and field-level remedies (§4.7).

// self
use crate::{_prelude::*, auth::TenantId};

const DEFAULT_TTL: Duration = Duration::seconds(300);

/// One cached enumeration kind, keyed by resource name (`"category"`, `"priority"`, …).
pub type MetadataKind = String;

#[derive(Clone)]
struct Entry {
	fetched_at: OffsetDateTime,
	value: Arc<serde_json::Value>,
}

/// Lazily populated, TTL-expiring cache of upstream metadata enumerations.
///
/// A cold read never blocks correctness: callers that find nothing cached fall back to an
/// on-demand fetch themselves, so the cache is purely an optimization.
pub struct MetadataCache {
	ttl: Duration,
	entries: RwLock<HashMap<(TenantId, MetadataKind), Entry>>,
}
impl MetadataCache {
	/// Builds a cache with the default five-minute TTL.
	pub fn new() -> Self {
		Self::with_ttl(DEFAULT_TTL)
	}

	/// Builds a cache with an explicit TTL, primarily for tests.
	pub fn with_ttl(ttl: Duration) -> Self {
		Self { ttl, entries: RwLock::new(HashMap::new()) }
	}

	/// Returns the cached value for `(tenant, kind)` if present and not expired.
	pub fn get(&self, tenant: &TenantId, kind: &str, now: OffsetDateTime) -> Option<Arc<serde_json::Value>> {
		let entries = self.entries.read();
		let entry = entries.get(&(tenant.clone(), kind.to_owned()))?;

		if now - entry.fetched_at >= self.ttl {
			return None;
		}

		Some(Arc::clone(&entry.value))
	}

	/// Publishes a freshly fetched value, replacing whatever was cached before.
	pub fn put(&self, tenant: &TenantId, kind: &str, value: serde_json::Value, now: OffsetDateTime) {
		self.entries.write().insert(
			(tenant.clone(), kind.to_owned()),
			Entry { fetched_at: now, value: Arc::new(value) },
		);
	}

	/// Drops a tenant's cached copy of one enumeration, forcing the next read to refetch.
	pub fn invalidate(&self, tenant: &TenantId, kind: &str) {
		self.entries.write().remove(&(tenant.clone(), kind.to_owned()));
	}

	/// Resolves a subcategory's parent category id from the cached `subcategory` enumeration,
	/// when present. Returns `None` on a cache miss; callers fetch on demand in that case.
	pub fn resolve_subcategory_parent(
		&self,
		tenant: &TenantId,
		subcategory_name: &str,
		now: OffsetDateTime,
	) -> Option<String> {
		let cached = self.get(tenant, "subcategory", now)?;
		let list = cached.as_array()?;
		let entry = list.iter().find(|entry| entry["name"].as_str() == Some(subcategory_name))?;

		entry["category"]["id"].as_str().map(str::to_owned)
	}

	/// Resolves the default closure code (first active code) from the cached `closure_code`
	/// enumeration, when present.
	pub fn default_closure_code(&self, tenant: &TenantId, now: OffsetDateTime) -> Option<String> {
		let cached = self.get(tenant, "closure_code", now)?;
		let list = cached.as_array()?;
		let entry = list.iter().find(|entry| entry["is_active"].as_bool().unwrap_or(true))?;

		entry["id"].as_str().map(str::to_owned)
	}
}
impl Default for MetadataCache {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn tenant() -> TenantId {
		TenantId::new("tenant-meta").unwrap()
	}

	#[test]
	fn put_then_get_round_trips_within_ttl() {
		let cache = MetadataCache::with_ttl(Duration::seconds(60));
		let now = OffsetDateTime::now_utc();

		cache.put(&tenant(), "priority", serde_json::json!([{"id": "1"}]), now);

		assert!(cache.get(&tenant(), "priority", now).is_some());
	}

	#[test]
	fn entry_expires_after_ttl_elapses() {
		let cache = MetadataCache::with_ttl(Duration::seconds(60));
		let now = OffsetDateTime::now_utc();

		cache.put(&tenant(), "priority", serde_json::json!([]), now);

		assert!(cache.get(&tenant(), "priority", now + Duration::seconds(61)).is_none());
	}

	#[test]
	fn resolve_subcategory_parent_finds_matching_entry() {
		let cache = MetadataCache::with_ttl(Duration::seconds(60));
		let now = OffsetDateTime::now_utc();

		cache.put(
			&tenant(),
			"subcategory",
			serde_json::json!([{"name": "Laptop", "category": {"id": "42"}}]),
			now,
		);

		assert_eq!(
			cache.resolve_subcategory_parent(&tenant(), "Laptop", now),
			Some("42".to_owned())
		);
	}

	#[test]
	fn invalidate_clears_the_entry() {
		let cache = MetadataCache::with_ttl(Duration::seconds(60));
		let now = OffsetDateTime::now_utc();

		cache.put(&tenant(), "priority", serde_json::json!([]), now);
		cache.invalidate(&tenant(), "priority");

		assert!(cache.get(&tenant(), "priority", now).is_none());
	}
}
