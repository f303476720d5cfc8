use std::fmt::{self, Display};

use async_graphql::{PathSegment, Pos, ServerError};
use serde::Serialize;
use thiserror::Error;

/// A GraphQL error, as returned in the `errors` list of a response.
#[derive(Clone, Debug, Default, PartialEq, Error, Serialize)]
#[error("{message}")]
pub struct GqlError {
	pub message: String,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub locations: Vec<Pos>,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub path: Vec<PathSegment>,
}

impl GqlError {
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			..Default::default()
		}
	}

	pub fn with_location(mut self, pos: Pos) -> Self {
		self.locations.push(pos);
		self
	}

	pub fn with_path(mut self, path: Vec<PathSegment>) -> Self {
		self.path = path;
		self
	}
}

impl From<GqlError> for ServerError {
	fn from(e: GqlError) -> Self {
		let mut err = ServerError::new(e.message, None);
		err.locations = e.locations;
		err.path = e.path;
		err
	}
}

/// An ordered list of GraphQL errors.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct GqlErrors(pub Vec<GqlError>);

impl std::error::Error for GqlErrors {}

impl Display for GqlErrors {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		for (i, e) in self.0.iter().enumerate() {
			if i > 0 {
				f.write_str("\n")?;
			}
			Display::fmt(e, f)?;
		}
		Ok(())
	}
}

impl GqlErrors {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn iter(&self) -> std::slice::Iter<'_, GqlError> {
		self.0.iter()
	}

	pub fn push(&mut self, e: GqlError) {
		self.0.push(e);
	}

	/// Turn any error into GraphQL errors, prefixing each message with some context.
	///
	/// Errors which are already GraphQL errors keep their locations and paths.
	pub fn wrap(err: anyhow::Error, context: impl Display) -> Self {
		let mut errors = Self::from(err);
		for e in errors.0.iter_mut() {
			e.message = format!("{context}: {}", e.message);
		}
		errors
	}

	/// The same as [`GqlErrors::wrap`], also attaching a source location to every error
	pub fn wrap_location(err: anyhow::Error, pos: Pos, context: impl Display) -> Self {
		let mut errors = Self::wrap(err, context);
		for e in errors.0.iter_mut() {
			e.locations.push(pos);
		}
		errors
	}

	/// Prefix every non-empty error path with a field name
	pub fn prefix_paths(&mut self, field: &str) {
		for e in self.0.iter_mut().filter(|e| !e.path.is_empty()) {
			e.path.insert(0, PathSegment::Field(field.to_owned()));
		}
	}
}

impl From<anyhow::Error> for GqlErrors {
	fn from(err: anyhow::Error) -> Self {
		let err = match err.downcast::<GqlErrors>() {
			Ok(errors) => return errors,
			Err(err) => err,
		};
		match err.downcast::<GqlError>() {
			Ok(e) => Self(vec![e]),
			Err(err) => Self(vec![GqlError::new(format!("{err:#}"))]),
		}
	}
}

impl From<GqlError> for GqlErrors {
	fn from(e: GqlError) -> Self {
		Self(vec![e])
	}
}

impl Extend<GqlError> for GqlErrors {
	fn extend<I: IntoIterator<Item = GqlError>>(&mut self, iter: I) {
		self.0.extend(iter)
	}
}

impl IntoIterator for GqlErrors {
	type Item = GqlError;
	type IntoIter = std::vec::IntoIter<GqlError>;

	fn into_iter(self) -> Self::IntoIter {
		self.0.into_iter()
	}
}

#[cfg(test)]
mod tests {
	use anyhow::anyhow;
	use serde_json::json;

	use super::*;

	fn pos(line: usize, column: usize) -> Pos {
		Pos {
			line,
			column,
		}
	}

	#[test]
	fn wrapping_a_plain_error_prefixes_the_message() {
		let errors = GqlErrors::wrap(anyhow!("connection reset"), "mutation addPost failed");
		assert_eq!(errors.len(), 1);
		assert_eq!(errors.0[0].message, "mutation addPost failed: connection reset");
		assert!(errors.0[0].locations.is_empty() && errors.0[0].path.is_empty());
	}

	#[test]
	fn wrapping_keeps_locations_and_paths() {
		let inner = GqlErrors(vec![
			GqlError::new("bad title")
				.with_location(pos(3, 7))
				.with_path(vec![PathSegment::Field("post".into()), PathSegment::Index(0)]),
			GqlError::new("bad author"),
		]);
		let errors = GqlErrors::wrap_location(inner.into(), pos(2, 3), "mutation addPost failed");
		assert_eq!(errors.0[0].message, "mutation addPost failed: bad title");
		assert_eq!(errors.0[0].locations, vec![pos(3, 7), pos(2, 3)]);
		assert_eq!(
			errors.0[0].path,
			vec![PathSegment::Field("post".into()), PathSegment::Index(0)]
		);
		assert_eq!(errors.0[1].message, "mutation addPost failed: bad author");
		assert_eq!(errors.0[1].locations, vec![pos(2, 3)]);
	}

	#[test]
	fn wrapping_a_single_graphql_error_keeps_it() {
		let inner =
			GqlError::new("no such type").with_path(vec![PathSegment::Field("author".into())]);
		let errors = GqlErrors::wrap(inner.into(), "couldn't rewrite mutation");
		assert_eq!(errors.0[0].message, "couldn't rewrite mutation: no such type");
		assert_eq!(errors.0[0].path.len(), 1);
	}

	#[test]
	fn only_non_empty_paths_are_prefixed() {
		let mut errors = GqlErrors(vec![
			GqlError::new("a").with_path(vec![PathSegment::Field("post".into())]),
			GqlError::new("b"),
		]);
		errors.prefix_paths("addPost");
		assert_eq!(
			errors.0[0].path,
			vec![PathSegment::Field("addPost".into()), PathSegment::Field("post".into())]
		);
		assert!(errors.0[1].path.is_empty());
	}

	#[test]
	fn serializes_to_the_wire_shape() {
		let errors = GqlErrors(vec![
			GqlError::new("a")
				.with_location(pos(1, 2))
				.with_path(vec![PathSegment::Field("addPost".into()), PathSegment::Index(1)]),
			GqlError::new("b"),
		]);
		assert_eq!(
			serde_json::to_value(&errors).unwrap(),
			json!([
				{
					"message": "a",
					"locations": [{ "line": 1, "column": 2 }],
					"path": ["addPost", 1],
				},
				{ "message": "b" },
			])
		);
	}

	#[test]
	fn converts_into_server_errors() {
		let server: ServerError = GqlError::new("a")
			.with_location(pos(4, 1))
			.with_path(vec![PathSegment::Field("addPost".into())])
			.into();
		assert_eq!(server.message, "a");
		assert_eq!(server.locations, vec![pos(4, 1)]);
		assert_eq!(server.path, vec![PathSegment::Field("addPost".into())]);
	}
}
