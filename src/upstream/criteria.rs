//! Search-criteria tree accepted by list/search operations (§4.7).

// self
use crate::_prelude::*;

/// Comparison operator applied to one criteria leaf.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Condition {
	/// `is`
	Is,
	/// `is not`
	IsNot,
	/// `contains`
	Contains,
	/// `not contains`
	NotContains,
	/// `starts with`
	StartsWith,
	/// `ends with`
	EndsWith,
	/// `greater than`
	GreaterThan,
	/// `greater or equal`
	GreaterOrEqual,
	/// `lesser than`
	LesserThan,
	/// `lesser or equal`
	LesserOrEqual,
	/// `between`
	Between,
	/// `not between`
	NotBetween,
}
impl Condition {
	fn as_str(self) -> &'static str {
		match self {
			Self::Is => "is",
			Self::IsNot => "is not",
			Self::Contains => "contains",
			Self::NotContains => "not contains",
			Self::StartsWith => "starts with",
			Self::EndsWith => "ends with",
			Self::GreaterThan => "greater than",
			Self::GreaterOrEqual => "greater or equal",
			Self::LesserThan => "lesser than",
			Self::LesserOrEqual => "lesser or equal",
			Self::Between => "between",
			Self::NotBetween => "not between",
		}
	}

	/// Parses the upstream's wire form of a condition, accepted from tool-call arguments.
	pub fn parse(value: &str) -> Option<Self> {
		Some(match value {
			"is" => Self::Is,
			"is not" => Self::IsNot,
			"contains" => Self::Contains,
			"not contains" => Self::NotContains,
			"starts with" => Self::StartsWith,
			"ends with" => Self::EndsWith,
			"greater than" => Self::GreaterThan,
			"greater or equal" => Self::GreaterOrEqual,
			"lesser than" => Self::LesserThan,
			"lesser or equal" => Self::LesserOrEqual,
			"between" => Self::Between,
			"not between" => Self::NotBetween,
			_ => return None,
		})
	}
}

/// How sibling children of one node combine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogicalOperator {
	/// All children must match.
	And,
	/// Any child may match.
	Or,
}
impl LogicalOperator {
	fn as_str(self) -> &'static str {
		match self {
			Self::And => "AND",
			Self::Or => "OR",
		}
	}

	fn parse(value: &str) -> Option<Self> {
		match value {
			"AND" => Some(Self::And),
			"OR" => Some(Self::Or),
			_ => None,
		}
	}
}

/// One leaf's comparison value: a single scalar, or a pair/list for `between`-style conditions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CriteriaValue {
	/// A single value, used by most conditions.
	Single(String),
	/// Multiple values, used by `between`/`not between`.
	Multiple(Vec<String>),
}

/// One node of the search-criteria tree (leaf or group).
///
/// A leaf carries `field`/`condition`/`value`; a group carries `children` joined by
/// `logical_operator`. Both shapes nest arbitrarily, matching the upstream contract.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchCriteria {
	field: Option<String>,
	condition: Option<Condition>,
	value: Option<CriteriaValue>,
	logical_operator: Option<LogicalOperator>,
	children: Vec<SearchCriteria>,
}
impl SearchCriteria {
	/// Builds an empty criteria tree; serializes to nothing and is omitted from the request.
	pub fn new() -> Self {
		Self::default()
	}

	/// Builds a single comparison leaf.
	pub fn leaf(field: impl Into<String>, condition: Condition, value: impl Into<String>) -> Self {
		Self {
			field: Some(field.into()),
			condition: Some(condition),
			value: Some(CriteriaValue::Single(value.into())),
			..Self::default()
		}
	}

	/// Builds a `between`/`not between` leaf from two bounds.
	pub fn leaf_range(
		field: impl Into<String>,
		condition: Condition,
		lower: impl Into<String>,
		upper: impl Into<String>,
	) -> Self {
		Self {
			field: Some(field.into()),
			condition: Some(condition),
			value: Some(CriteriaValue::Multiple(vec![lower.into(), upper.into()])),
			..Self::default()
		}
	}

	/// Combines this node with `other` using `operator`, producing a new group node.
	pub fn combine(self, operator: LogicalOperator, other: Self) -> Self {
		Self { logical_operator: Some(operator), children: vec![self, other], ..Self::default() }
	}

	/// True when this node carries neither a leaf comparison nor any children.
	pub fn is_empty(&self) -> bool {
		self.field.is_none() && self.children.is_empty()
	}

	/// Renders the tree into the upstream's JSON shape; `None` when empty, matching the
	/// contract that empty criteria omit the `search_criteria` key entirely.
	pub fn to_json(&self) -> Option<serde_json::Value> {
		if self.is_empty() {
			return None;
		}

		Some(self.render())
	}

	fn render(&self) -> serde_json::Value {
		if !self.children.is_empty() {
			return serde_json::json!({
				"logical_operator": self.logical_operator.unwrap_or(LogicalOperator::And).as_str(),
				"children": self.children.iter().map(Self::render).collect::<Vec<_>>(),
			});
		}

		let value = match &self.value {
			Some(CriteriaValue::Single(v)) => serde_json::json!(v),
			Some(CriteriaValue::Multiple(vs)) => serde_json::json!(vs),
			None => serde_json::Value::Null,
		};

		serde_json::json!({
			"field": self.field,
			"condition": self.condition.map(Condition::as_str),
			"value": value,
		})
	}

	/// Reconstructs a tree from its rendered JSON shape, the inverse of [`Self::to_json`].
	///
	/// Returns `None` for anything that isn't a well-formed leaf or group node, rather than
	/// panicking on malformed input.
	pub fn from_json(value: &serde_json::Value) -> Option<Self> {
		if let Some(children) = value.get("children").and_then(serde_json::Value::as_array) {
			let operator = value["logical_operator"].as_str().and_then(LogicalOperator::parse)?;
			let children = children.iter().map(Self::from_json).collect::<Option<Vec<_>>>()?;

			return Some(Self { logical_operator: Some(operator), children, ..Self::default() });
		}

		let field = value["field"].as_str()?.to_owned();
		let condition = Condition::parse(value["condition"].as_str()?)?;
		let criteria_value = match &value["value"] {
			serde_json::Value::String(s) => CriteriaValue::Single(s.clone()),
			serde_json::Value::Array(items) =>
				CriteriaValue::Multiple(items.iter().map(|v| v.as_str().map(str::to_owned)).collect::<Option<Vec<_>>>()?),
			_ => return None,
		};

		Some(Self {
			field: Some(field),
			condition: Some(condition),
			value: Some(criteria_value),
			..Self::default()
		})
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn empty_criteria_serializes_to_none() {
		assert!(SearchCriteria::new().to_json().is_none());
	}

	#[test]
	fn single_leaf_renders_field_condition_value() {
		let criteria = SearchCriteria::leaf("status.name", Condition::Is, "Open");
		let json = criteria.to_json().unwrap();

		assert_eq!(json["field"], "status.name");
		assert_eq!(json["condition"], "is");
		assert_eq!(json["value"], "Open");
	}

	#[test]
	fn combined_leaves_nest_under_logical_operator() {
		let criteria = SearchCriteria::leaf("priority.name", Condition::Is, "High")
			.combine(LogicalOperator::Or, SearchCriteria::leaf("priority.name", Condition::Is, "Urgent"));
		let json = criteria.to_json().unwrap();

		assert_eq!(json["logical_operator"], "OR");
		assert_eq!(json["children"].as_array().unwrap().len(), 2);
	}

	#[test]
	fn parse_round_trips_every_condition_wire_form() {
		assert_eq!(Condition::parse("is"), Some(Condition::Is));
		assert_eq!(Condition::parse("not between"), Some(Condition::NotBetween));
		assert_eq!(Condition::parse("nonsense"), None);
	}

	#[test]
	fn from_json_round_trips_a_single_leaf() {
		let criteria = SearchCriteria::leaf("status.name", Condition::Is, "Open");
		let json = criteria.to_json().unwrap();

		assert_eq!(SearchCriteria::from_json(&json).unwrap(), criteria);
	}

	#[test]
	fn from_json_round_trips_a_nested_group() {
		let criteria = SearchCriteria::leaf("priority.name", Condition::Is, "High")
			.combine(LogicalOperator::Or, SearchCriteria::leaf("priority.name", Condition::Is, "Urgent"))
			.combine(LogicalOperator::And, SearchCriteria::leaf("status.name", Condition::IsNot, "Closed"));
		let json = criteria.to_json().unwrap();

		assert_eq!(SearchCriteria::from_json(&json).unwrap(), criteria);
	}

	#[test]
	fn from_json_round_trips_a_between_leaf() {
		let criteria = SearchCriteria::leaf_range("created_time", Condition::Between, "1700000000000", "1700086400000");
		let json = criteria.to_json().unwrap();

		assert_eq!(SearchCriteria::from_json(&json).unwrap(), criteria);
	}

	#[test]
	fn from_json_rejects_malformed_input() {
		assert!(SearchCriteria::from_json(&serde_json::json!({"field": "status.name"})).is_none());
		assert!(SearchCriteria::from_json(&serde_json::json!({"children": [], "logical_operator": "XOR"})).is_none());
	}

	#[test]
	fn between_leaf_carries_two_values() {
		let criteria = SearchCriteria::leaf_range(
			"created_time",
			Condition::Between,
			"1700000000000",
			"1700086400000",
		);
		let json = criteria.to_json().unwrap();

		assert_eq!(json["value"].as_array().unwrap().len(), 2);
	}
}
