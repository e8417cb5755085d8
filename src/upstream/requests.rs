//! Typed request/note/metadata operations and their field-level remedies (§4.7).

// self
use crate::{
	_prelude::*,
	auth::tenant::Tenant,
	http::TokenHttpClient,
	upstream::{Condition, SearchCriteria, UpstreamAdapter, UpstreamHttpClient, UpstreamMethod, encode_input_data},
};

const MAX_ROW_COUNT: u32 = 100;

/// A reference to another entity: preferably by `id`, falling back to `name`; `requester` also
/// accepts `email_id`.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum Reference {
	/// Reference by opaque id, the adapter's preferred form when the id is known.
	Id {
		/// The referenced entity's id.
		id: String,
	},
	/// Reference by display name, used when no id has been resolved yet.
	Name {
		/// The referenced entity's name.
		name: String,
	},
	/// Requester-only reference by email address.
	Email {
		/// The requester's email address.
		email_id: String,
	},
}
impl Reference {
	/// Builds an id reference.
	pub fn id(id: impl Into<String>) -> Self {
		Self::Id { id: id.into() }
	}

	/// Builds a name reference.
	pub fn name(name: impl Into<String>) -> Self {
		Self::Name { name: name.into() }
	}

	/// Builds a requester email reference.
	pub fn email(email_id: impl Into<String>) -> Self {
		Self::Email { email_id: email_id.into() }
	}
}

/// Mutable fields shared by `create_request` and `update_request`.
///
/// All fields are optional; only fields explicitly set are sent, so partial updates never
/// clobber values the caller didn't mention.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RequestFields {
	#[serde(skip_serializing_if = "Option::is_none")]
	subject: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	description: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	requester: Option<Reference>,
	#[serde(skip_serializing_if = "Option::is_none")]
	category: Option<Reference>,
	#[serde(skip_serializing_if = "Option::is_none")]
	subcategory: Option<Reference>,
	#[serde(skip_serializing_if = "Option::is_none")]
	priority: Option<Reference>,
	#[serde(skip_serializing_if = "Option::is_none")]
	technician: Option<Reference>,
	#[serde(skip_serializing_if = "Option::is_none")]
	status: Option<Reference>,
}
impl RequestFields {
	/// Starts an empty field set.
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the subject line.
	pub fn subject(mut self, subject: impl Into<String>) -> Self {
		self.subject = Some(subject.into());

		self
	}

	/// Sets the description body.
	pub fn description(mut self, description: impl Into<String>) -> Self {
		self.description = Some(description.into());

		self
	}

	/// Sets the requester reference.
	pub fn requester(mut self, requester: Reference) -> Self {
		self.requester = Some(requester);

		self
	}

	/// Sets the category reference.
	pub fn category(mut self, category: Reference) -> Self {
		self.category = Some(category);

		self
	}

	/// Sets the subcategory reference.
	pub fn subcategory(mut self, subcategory: Reference) -> Self {
		self.subcategory = Some(subcategory);

		self
	}

	/// Sets the priority reference.
	pub fn priority(mut self, priority: Reference) -> Self {
		self.priority = Some(priority);

		self
	}

	/// Sets the technician reference.
	pub fn technician(mut self, technician: Reference) -> Self {
		self.technician = Some(technician);

		self
	}

	/// Sets the status reference.
	pub fn status(mut self, status: Reference) -> Self {
		self.status = Some(status);

		self
	}

	/// Whether a priority was explicitly requested; used to decide whether priority must be
	/// applied via a follow-up `update_request` when an instance rejects it on create.
	pub fn wants_priority(&self) -> bool {
		self.priority.is_some()
	}

	/// Takes the priority back out, leaving the rest of the field set unchanged; used when a
	/// priority must be deferred to a follow-up update.
	pub fn take_priority(&mut self) -> Option<Reference> {
		self.priority.take()
	}
}

/// Alias kept distinct from [`RequestFields`] at the call site for readability; `create_request`
/// and `update_request` accept the same shape.
pub type CreateRequestFields = RequestFields;
/// See [`CreateRequestFields`].
pub type UpdateRequestFields = RequestFields;

/// Closure payload for `close_request`.
#[derive(Clone, Debug, Serialize)]
pub struct ClosureInfo {
	closure_comments: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	closure_code: Option<Reference>,
}
impl ClosureInfo {
	/// Builds a closure with comments and no explicit closure code.
	pub fn new(closure_comments: impl Into<String>) -> Self {
		Self { closure_comments: closure_comments.into(), closure_code: None }
	}

	/// Attaches an explicit closure code.
	pub fn with_closure_code(mut self, closure_code: Reference) -> Self {
		self.closure_code = Some(closure_code);

		self
	}
}

/// Fields accepted by `add_note`.
#[derive(Clone, Debug, Serialize)]
pub struct NoteFields {
	description: String,
	show_to_requester: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	notify_technician: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	mark_first_response: Option<bool>,
}
impl NoteFields {
	/// Builds a note body with the requester-visibility flag that determines whether the SaaS
	/// sends an email (`true`) or keeps the note internal (`false`).
	pub fn new(description: impl Into<String>, show_to_requester: bool) -> Self {
		Self {
			description: description.into(),
			show_to_requester,
			notify_technician: None,
			mark_first_response: None,
		}
	}

	/// Sets whether assigned technicians are notified.
	pub fn notify_technician(mut self, notify: bool) -> Self {
		self.notify_technician = Some(notify);

		self
	}

	/// Marks this note as the request's first response.
	pub fn mark_first_response(mut self, first: bool) -> Self {
		self.mark_first_response = Some(first);

		self
	}
}

/// One page request for a `list_*` operation.
#[derive(Clone, Debug)]
pub struct PageRequest {
	row_count: u32,
	start_index: u32,
	get_total_count: bool,
	criteria: SearchCriteria,
}
impl PageRequest {
	/// Builds a page request; `row_count` is clamped to the upstream's documented maximum of
	/// 100, and `start_index` follows the upstream's 1-based convention.
	pub fn new(row_count: u32, start_index: u32) -> Self {
		Self {
			row_count: row_count.min(MAX_ROW_COUNT),
			start_index: start_index.max(1),
			get_total_count: false,
			criteria: SearchCriteria::new(),
		}
	}

	/// Requests the total matching count alongside the page.
	pub fn with_total_count(mut self) -> Self {
		self.get_total_count = true;

		self
	}

	/// Attaches a search-criteria tree.
	pub fn with_criteria(mut self, criteria: SearchCriteria) -> Self {
		self.criteria = criteria;

		self
	}

	fn list_info_json(&self) -> serde_json::Value {
		let mut info = serde_json::json!({
			"row_count": self.row_count,
			"start_index": self.start_index,
			"get_total_count": self.get_total_count,
		});

		if let Some(criteria) = self.criteria.to_json() {
			info["search_criteria"] = criteria;
		}

		info
	}
}
impl Default for PageRequest {
	fn default() -> Self {
		Self::new(MAX_ROW_COUNT, 1)
	}
}

impl<H, U> UpstreamAdapter<H, U>
where
	H: TokenHttpClient,
	U: UpstreamHttpClient,
{
	fn resource_url(&self, tenant: &Tenant, path: &str) -> Url {
		let mut url = tenant.api_root();

		url.path_segments_mut().expect("Tenant API root carries a path.").extend(path.split('/'));

		url
	}

	fn resource_url_with_input_data(&self, tenant: &Tenant, path: &str, payload: &serde_json::Value) -> Url {
		let mut url = self.resource_url(tenant, path);

		url.set_query(Some(&encode_input_data(payload)));

		url
	}

	/// `GET /requests` — paginated, filterable request listing.
	pub async fn list_requests(
		&self,
		tenant: &Tenant,
		page: PageRequest,
	) -> Result<serde_json::Value, Error> {
		let payload = serde_json::json!({ "list_info": page.list_info_json() });
		let url = self.resource_url_with_input_data(tenant, "requests", &payload);

		self.call(tenant, UpstreamMethod::Get, url, None).await
	}

	/// `GET /requests/{id}` — fetch one request by id.
	pub async fn get_request(&self, tenant: &Tenant, id: &str) -> Result<serde_json::Value, Error> {
		let url = self.resource_url(tenant, &format!("requests/{id}"));

		self.call(tenant, UpstreamMethod::Get, url, None).await
	}

	/// `POST /requests` — creates a request.
	///
	/// When `fields` names a subcategory by name, the subcategory's parent category id is
	/// resolved from the metadata cache first, because the upstream requires the subcategory
	/// to be nested under the chosen category. A priority explicitly requested by the caller
	/// is re-applied via `update_request` if the instance rejects it on create.
	pub async fn create_request(
		&self,
		tenant: &Tenant,
		mut fields: RequestFields,
	) -> Result<serde_json::Value, Error> {
		if let Some(Reference::Name { name }) = &fields.subcategory {
			if let Some(category_id) =
				self.metadata.resolve_subcategory_parent(&tenant.id, name, OffsetDateTime::now_utc())
			{
				fields.category = Some(Reference::id(category_id));
			}
		}

		let wanted_priority = fields.wants_priority();
		let deferred_priority = fields.take_priority();
		let url = self.resource_url(tenant, "requests");
		let payload = serde_json::json!({ "request": fields });
		let body = encode_input_data(&payload);

		let result = self.call(tenant, UpstreamMethod::Post, url, Some(body)).await?;

		if wanted_priority {
			if let (Some(priority), Some(id)) = (deferred_priority, result["request"]["id"].as_str()) {
				let update = RequestFields::new().priority(priority);

				return self.update_request(tenant, id, update).await;
			}
		}

		Ok(result)
	}

	/// `PUT /requests/{id}` — partially updates a request.
	pub async fn update_request(
		&self,
		tenant: &Tenant,
		id: &str,
		fields: RequestFields,
	) -> Result<serde_json::Value, Error> {
		let url = self.resource_url(tenant, &format!("requests/{id}"));
		let payload = serde_json::json!({ "request": fields });
		let body = encode_input_data(&payload);

		self.call(tenant, UpstreamMethod::Put, url, Some(body)).await
	}

	/// `PUT /requests/{id}` with a closure payload.
	///
	/// If the instance rejects the first attempt for a missing `closure_code`, the adapter
	/// retries once with the default active closure code from the metadata cache.
	pub async fn close_request(
		&self,
		tenant: &Tenant,
		id: &str,
		closure: ClosureInfo,
	) -> Result<serde_json::Value, Error> {
		let url = self.resource_url(tenant, &format!("requests/{id}"));
		let payload = |closure: &ClosureInfo| {
			serde_json::json!({
				"request": {
					"status": { "name": "Closed" },
					"closure_info": closure,
				},
			})
		};

		match self.call(tenant, UpstreamMethod::Put, url.clone(), Some(encode_input_data(&payload(&closure)))).await {
			Err(Error::UpstreamValidation { fields, .. })
				if fields.iter().any(|f| f == "closure_code") && closure.closure_code.is_none() =>
			{
				let Some(code) =
					self.metadata.default_closure_code(&tenant.id, OffsetDateTime::now_utc())
				else {
					return Err(Error::UpstreamValidation {
						message: "Instance requires a closure code and none is cached.".into(),
						fields: vec!["closure_code".into()],
					});
				};
				let retried = closure.with_closure_code(Reference::id(code));

				self.call(tenant, UpstreamMethod::Put, url, Some(encode_input_data(&payload(&retried)))).await
			},
			other => other,
		}
	}

	/// `POST /requests/{id}/notes` — adds a note.
	pub async fn add_note(
		&self,
		tenant: &Tenant,
		id: &str,
		note: NoteFields,
	) -> Result<serde_json::Value, Error> {
		let url = self.resource_url(tenant, &format!("requests/{id}/notes"));
		let payload = serde_json::json!({ "request_note": note });
		let body = encode_input_data(&payload);

		self.call(tenant, UpstreamMethod::Post, url, Some(body)).await
	}

	/// `GET /requests/{id}/notes` — lists notes on a request.
	pub async fn list_notes(&self, tenant: &Tenant, id: &str) -> Result<serde_json::Value, Error> {
		let url = self.resource_url(tenant, &format!("requests/{id}/notes"));

		self.call(tenant, UpstreamMethod::Get, url, None).await
	}

	/// `GET /{kind}` — lists one enumeration (category, priority, status, closure_code, …) and
	/// publishes the result into the metadata cache.
	pub async fn list_metadata(&self, tenant: &Tenant, kind: &str) -> Result<serde_json::Value, Error> {
		let payload = serde_json::json!({ "list_info": PageRequest::default().list_info_json() });
		let url = self.resource_url_with_input_data(tenant, kind, &payload);
		let result = self.call(tenant, UpstreamMethod::Get, url, None).await?;

		if let Some(list) = result.get(format!("{kind}s").as_str()).or_else(|| result.get(kind)) {
			self.metadata.put(&tenant.id, kind, list.clone(), OffsetDateTime::now_utc());
		}

		Ok(result)
	}

	/// `GET /subcategories` — lists subcategories, optionally scoped to one category.
	pub async fn list_subcategories(
		&self,
		tenant: &Tenant,
		category_id: Option<&str>,
	) -> Result<serde_json::Value, Error> {
		let mut page = PageRequest::default();

		if let Some(category_id) = category_id {
			page = page.with_criteria(SearchCriteria::leaf("category.id", Condition::Is, category_id));
		}

		let payload = serde_json::json!({ "list_info": page.list_info_json() });
		let url = self.resource_url_with_input_data(tenant, "subcategories", &payload);
		let result = self.call(tenant, UpstreamMethod::Get, url, None).await?;

		if let Some(list) = result.get("subcategories") {
			self.metadata.put(&tenant.id, "subcategory", list.clone(), OffsetDateTime::now_utc());
		}

		Ok(result)
	}

	/// `GET /technicians` — lists technicians eligible for assignment.
	pub async fn list_technicians(
		&self,
		tenant: &Tenant,
		page: PageRequest,
	) -> Result<serde_json::Value, Error> {
		let payload = serde_json::json!({ "list_info": page.list_info_json() });
		let url = self.resource_url_with_input_data(tenant, "technicians", &payload);

		self.call(tenant, UpstreamMethod::Get, url, None).await
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn request_fields_omit_unset_members() {
		let fields = RequestFields::new().subject("Printer jam");
		let json = serde_json::to_value(&fields).unwrap();

		assert_eq!(json["subject"], "Printer jam");
		assert!(json.get("priority").is_none());
	}

	#[test]
	fn reference_variants_serialize_untagged() {
		assert_eq!(serde_json::to_value(Reference::id("42")).unwrap(), serde_json::json!({"id": "42"}));
		assert_eq!(
			serde_json::to_value(Reference::email("a@example.com")).unwrap(),
			serde_json::json!({"email_id": "a@example.com"})
		);
	}

	#[test]
	fn page_request_clamps_row_count_and_enforces_one_based_start() {
		let page = PageRequest::new(500, 0);
		let json = page.list_info_json();

		assert_eq!(json["row_count"], 100);
		assert_eq!(json["start_index"], 1);
	}

	#[test]
	fn page_request_omits_search_criteria_when_empty() {
		let json = PageRequest::default().list_info_json();

		assert!(json.get("search_criteria").is_none());
	}

	#[test]
	fn closure_info_omits_closure_code_until_set() {
		let json = serde_json::to_value(ClosureInfo::new("Resolved by rebooting.")).unwrap();

		assert!(json.get("closure_code").is_none());
	}
}
