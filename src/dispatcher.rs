//! Static tool registry, argument validation, and scope enforcement for `tools/list` and
//! `tools/call` (§4.8).

// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, tenant::Tenant},
	http::TokenHttpClient,
	upstream::{
		ClosureInfo, Condition, CreateRequestFields, LogicalOperator, NoteFields, Reference,
		SearchCriteria, UpdateRequestFields, UpstreamAdapter, UpstreamHttpClient, requests::PageRequest,
	},
};

type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<serde_json::Value, Error>> + Send + 'a>>;
type ToolHandler<H, U> = for<'a> fn(&'a UpstreamAdapter<H, U>, &'a Tenant, serde_json::Value) -> HandlerFuture<'a>;

/// One entry in the static tool registry.
pub struct ToolDefinition<H, U> {
	/// Tool name as it appears in `tools/list` and `tools/call`.
	pub name: &'static str,
	/// Human-readable description surfaced to the MCP client.
	pub description: &'static str,
	/// Scopes the tenant must have granted for this tool to appear or run.
	pub required_scopes: &'static [&'static str],
	handler: ToolHandler<H, U>,
}

/// MCP `content` item wrapping one tool result.
#[derive(Clone, Debug, Serialize)]
pub struct ToolContent {
	#[serde(rename = "type")]
	kind: &'static str,
	text: String,
}

/// Dispatches `tools/list` and `tools/call` against the static registry, enforcing per-tool
/// scope requirements before invoking an [`UpstreamAdapter`] operation.
pub struct ToolDispatcher<H, U> {
	adapter: Arc<UpstreamAdapter<H, U>>,
	registry: Vec<ToolDefinition<H, U>>,
}
impl<H, U> ToolDispatcher<H, U>
where
	H: TokenHttpClient,
	U: UpstreamHttpClient,
{
	/// Builds a dispatcher over the fixed tool registry.
	pub fn new(adapter: Arc<UpstreamAdapter<H, U>>) -> Self {
		Self { adapter, registry: registry() }
	}

	/// `tools/list`: the subset of the registry the tenant's granted scopes unlock.
	pub fn list_tools(&self, granted: &ScopeSet) -> Vec<serde_json::Value> {
		self.registry
			.iter()
			.filter(|tool| tool.required_scopes.iter().all(|s| granted.contains(s)))
			.map(|tool| {
				serde_json::json!({
					"name": tool.name,
					"description": tool.description,
				})
			})
			.collect()
	}

	/// `tools/call`: validates the tool exists and the tenant has the required scopes, then
	/// invokes its handler and wraps the result as MCP `content`.
	pub async fn call_tool(
		&self,
		name: &str,
		arguments: serde_json::Value,
		tenant: &Tenant,
		granted: &ScopeSet,
	) -> Result<Vec<ToolContent>, Error> {
		let tool =
			self.registry.iter().find(|t| t.name == name).ok_or_else(|| Error::MethodNotFound { method: name.to_owned() })?;

		for scope in tool.required_scopes {
			if !granted.contains(scope) {
				return Err(Error::ForbiddenByScope { scope: (*scope).to_owned() });
			}
		}

		let result = (tool.handler)(&self.adapter, tenant, arguments).await?;

		Ok(vec![ToolContent { kind: "text", text: result.to_string() }])
	}
}

fn registry<H, U>() -> Vec<ToolDefinition<H, U>>
where
	H: TokenHttpClient,
	U: UpstreamHttpClient,
{
	vec![
		ToolDefinition {
			name: "list_requests",
			description: "List service desk requests, optionally filtered and paginated.",
			required_scopes: &["requests:read"],
			handler: |adapter, tenant, args| {
				Box::pin(async move {
					let row_count = args["row_count"].as_u64().unwrap_or(100) as u32;
					let start_index = args["start_index"].as_u64().unwrap_or(1) as u32;

					adapter.list_requests(tenant, PageRequest::new(row_count, start_index)).await
				})
			},
		},
		ToolDefinition {
			name: "get_request",
			description: "Fetch one service desk request by id.",
			required_scopes: &["requests:read"],
			handler: |adapter, tenant, args| {
				Box::pin(async move {
					let id = require_str(&args, "id")?;

					adapter.get_request(tenant, &id).await
				})
			},
		},
		ToolDefinition {
			name: "create_request",
			description: "Create a new service desk request.",
			required_scopes: &["requests:write"],
			handler: |adapter, tenant, args| {
				Box::pin(async move {
					let subject = require_str(&args, "subject")?;
					let mut fields = CreateRequestFields::new().subject(subject);

					if let Some(description) = args["description"].as_str() {
						fields = fields.description(description);
					}
					if let Some(email) = args["requester_email"].as_str() {
						fields = fields.requester(Reference::email(email));
					}
					if let Some(category) = args["category"].as_str() {
						fields = fields.category(Reference::name(category));
					}
					if let Some(subcategory) = args["subcategory"].as_str() {
						fields = fields.subcategory(Reference::name(subcategory));
					}
					if let Some(priority) = args["priority"].as_str() {
						fields = fields.priority(Reference::name(priority));
					}

					adapter.create_request(tenant, fields).await
				})
			},
		},
		ToolDefinition {
			name: "update_request",
			description: "Update fields on an existing service desk request.",
			required_scopes: &["requests:write"],
			handler: |adapter, tenant, args| {
				Box::pin(async move {
					let id = require_str(&args, "id")?;
					let mut fields = UpdateRequestFields::new();

					if let Some(subject) = args["subject"].as_str() {
						fields = fields.subject(subject);
					}
					if let Some(description) = args["description"].as_str() {
						fields = fields.description(description);
					}
					if let Some(priority) = args["priority"].as_str() {
						fields = fields.priority(Reference::name(priority));
					}
					if let Some(technician) = args["technician"].as_str() {
						fields = fields.technician(Reference::name(technician));
					}

					adapter.update_request(tenant, &id, fields).await
				})
			},
		},
		ToolDefinition {
			name: "close_request",
			description: "Close a service desk request with closure comments.",
			required_scopes: &["requests:write"],
			handler: |adapter, tenant, args| {
				Box::pin(async move {
					let id = require_str(&args, "id")?;
					let comments = require_str(&args, "closure_comments")?;

					adapter.close_request(tenant, &id, ClosureInfo::new(comments)).await
				})
			},
		},
		ToolDefinition {
			name: "search_requests",
			description: "Search service desk requests with a flat list of AND-combined field/condition/value criteria.",
			required_scopes: &["requests:read"],
			handler: |adapter, tenant, args| {
				Box::pin(async move {
					let row_count = args["row_count"].as_u64().unwrap_or(100) as u32;
					let start_index = args["start_index"].as_u64().unwrap_or(1) as u32;
					let criteria = parse_criteria(&args["criteria"])?;
					let page = PageRequest::new(row_count, start_index).with_criteria(criteria);

					adapter.list_requests(tenant, page).await
				})
			},
		},
		ToolDefinition {
			name: "reply_to_requester",
			description: "Post a note visible to the requester, optionally marking it as the first response.",
			required_scopes: &["requests:write"],
			handler: |adapter, tenant, args| {
				Box::pin(async move {
					let id = require_str(&args, "request_id")?;
					let message = require_str(&args, "reply_message")?;
					let mark_first_response = args["mark_first_response"].as_bool().unwrap_or(false);
					let note = NoteFields::new(message, true).mark_first_response(mark_first_response);

					adapter.add_note(tenant, &id, note).await
				})
			},
		},
		ToolDefinition {
			name: "add_note",
			description: "Add a note to a service desk request.",
			required_scopes: &["requests:write"],
			handler: |adapter, tenant, args| {
				Box::pin(async move {
					let id = require_str(&args, "id")?;
					let description = require_str(&args, "description")?;
					let show_to_requester = args["show_to_requester"].as_bool().unwrap_or(false);

					adapter.add_note(tenant, &id, NoteFields::new(description, show_to_requester)).await
				})
			},
		},
		ToolDefinition {
			name: "list_notes",
			description: "List notes on a service desk request.",
			required_scopes: &["requests:read"],
			handler: |adapter, tenant, args| {
				Box::pin(async move {
					let id = require_str(&args, "id")?;

					adapter.list_notes(tenant, &id).await
				})
			},
		},
		ToolDefinition {
			name: "list_metadata",
			description: "List one upstream enumeration, e.g. category, priority, or closure_code.",
			required_scopes: &["metadata:read"],
			handler: |adapter, tenant, args| {
				Box::pin(async move {
					let kind = require_str(&args, "kind")?;

					adapter.list_metadata(tenant, &kind).await
				})
			},
		},
		ToolDefinition {
			name: "list_subcategories",
			description: "List subcategories, optionally scoped to one category id.",
			required_scopes: &["metadata:read"],
			handler: |adapter, tenant, args| {
				Box::pin(async move {
					let category_id = args["category_id"].as_str();

					adapter.list_subcategories(tenant, category_id).await
				})
			},
		},
		ToolDefinition {
			name: "list_technicians",
			description: "List technicians eligible for request assignment.",
			required_scopes: &["metadata:read"],
			handler: |adapter, tenant, args| {
				Box::pin(async move {
					let row_count = args["row_count"].as_u64().unwrap_or(100) as u32;
					let start_index = args["start_index"].as_u64().unwrap_or(1) as u32;

					adapter.list_technicians(tenant, PageRequest::new(row_count, start_index)).await
				})
			},
		},
	]
}

fn require_str(args: &serde_json::Value, field: &str) -> Result<String, Error> {
	args[field].as_str().map(str::to_owned).ok_or_else(|| Error::InvalidParams {
		reason: format!("Missing or non-string field: {field}."),
		fields: vec![field.to_owned()],
	})
}

/// Builds a search-criteria tree from a flat JSON array of `{field, condition, value}` leaves,
/// combined with `AND`; an empty or missing array yields an unconstrained search.
fn parse_criteria(value: &serde_json::Value) -> Result<SearchCriteria, Error> {
	let Some(leaves) = value.as_array() else {
		return Ok(SearchCriteria::new());
	};

	let mut tree = SearchCriteria::new();

	for leaf in leaves {
		let field = leaf["field"].as_str().ok_or_else(|| Error::InvalidParams {
			reason: "Each search criteria entry needs a field name.".into(),
			fields: vec!["criteria".into()],
		})?;
		let condition_raw = leaf["condition"].as_str().ok_or_else(|| Error::InvalidParams {
			reason: "Each search criteria entry needs a condition.".into(),
			fields: vec!["criteria".into()],
		})?;
		let condition = Condition::parse(condition_raw).ok_or_else(|| Error::InvalidParams {
			reason: format!("Unknown search condition: {condition_raw}."),
			fields: vec!["criteria".into()],
		})?;
		let value = leaf["value"].as_str().ok_or_else(|| Error::InvalidParams {
			reason: "Each search criteria entry needs a value.".into(),
			fields: vec!["criteria".into()],
		})?;
		let node = SearchCriteria::leaf(field, condition, value);

		tree = if tree.is_empty() { node } else { tree.combine(LogicalOperator::And, node) };
	}

	Ok(tree)
}
