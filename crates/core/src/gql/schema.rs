use std::fmt;

use async_graphql::Pos;
use serde_json::{Map, Value};

/// The kind of write a mutation field performs.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum MutationType {
	Add,
	Update,
	Delete,
	/// A mutation the schema defines, but which has no resolver
	Custom(String),
}

impl fmt::Display for MutationType {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::Add => f.write_str("ADD"),
			Self::Update => f.write_str("UPDATE"),
			Self::Delete => f.write_str("DELETE"),
			Self::Custom(name) => write!(f, "CUSTOM({name})"),
		}
	}
}

/// A selected field within an operation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Field {
	pub name: String,
	pub alias: Option<String>,
	pub location: Pos,
	pub arguments: Map<String, Value>,
	pub selection: Vec<Field>,
}

impl Field {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			..Default::default()
		}
	}

	pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
		self.alias = Some(alias.into());
		self
	}

	pub fn with_location(mut self, location: Pos) -> Self {
		self.location = location;
		self
	}

	pub fn with_argument(mut self, name: impl Into<String>, value: Value) -> Self {
		self.arguments.insert(name.into(), value);
		self
	}

	pub fn with_selection(mut self, selection: Vec<Field>) -> Self {
		self.selection = selection;
		self
	}

	/// The key this field is returned under in a response
	pub fn response_name(&self) -> &str {
		self.alias.as_deref().unwrap_or(&self.name)
	}
}

/// A single mutation field of a mutation operation.
///
/// A mutation such as `addPost(input: {...}) { post { title } }` writes data,
/// and then returns the nested query field (`post { title }`), which is run
/// against the data once the write has succeeded.
#[derive(Clone, Debug, PartialEq)]
pub struct Mutation {
	field: Field,
	kind: MutationType,
	query_field: Field,
}

impl Mutation {
	pub fn new(field: Field, kind: MutationType) -> Self {
		Self {
			field,
			kind,
			query_field: Field::default(),
		}
	}

	pub fn with_query_field(mut self, query_field: Field) -> Self {
		self.query_field = query_field;
		self
	}

	pub fn name(&self) -> &str {
		&self.field.name
	}

	/// The alias of this mutation, which is its name when it has none
	pub fn alias(&self) -> &str {
		self.field.response_name()
	}

	pub fn response_name(&self) -> &str {
		self.field.response_name()
	}

	pub fn kind(&self) -> &MutationType {
		&self.kind
	}

	pub fn location(&self) -> Pos {
		self.field.location
	}

	pub fn arguments(&self) -> &Map<String, Value> {
		&self.field.arguments
	}

	/// The query run once the mutation has been applied
	pub fn query_field(&self) -> &Field {
		&self.query_field
	}

	pub fn field(&self) -> &Field {
		&self.field
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn response_names_prefer_the_alias() {
		let plain = Mutation::new(Field::new("addPost"), MutationType::Add);
		assert_eq!(plain.response_name(), "addPost");
		let aliased = Mutation::new(Field::new("addPost").with_alias("first"), MutationType::Add);
		assert_eq!(aliased.response_name(), "first");
		assert_eq!(aliased.alias(), "first");
		assert_eq!(aliased.name(), "addPost");
	}

	#[test]
	fn mutations_expose_their_field() {
		let field = Field::new("updatePost")
			.with_location(Pos {
				line: 2,
				column: 3,
			})
			.with_argument("input", json!({ "title": "GraphQL" }));
		let mutation = Mutation::new(field, MutationType::Update)
			.with_query_field(Field::new("post").with_selection(vec![Field::new("title")]));
		assert_eq!(mutation.location().line, 2);
		assert_eq!(mutation.arguments()["input"]["title"], "GraphQL");
		assert_eq!(mutation.query_field().selection[0].name, "title");
		assert_eq!(mutation.kind().to_string(), "UPDATE");
	}
}
