//! The collaborators a mutation is resolved through.
//!
//! A mutation is rewritten into a backend write, applied by a [`Client`], read
//! back with a query built by a [`QueryRewriter`], and finally shaped into the
//! requested selection by a [`ResultCompleter`].

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::ctx::Context;
use crate::gql::error::GqlErrors;
use crate::gql::schema::{Field, Mutation};

/// A read in the backend's native query language.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BackendQuery(pub String);

/// A write in the backend's native form.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BackendMutation {
	/// Data to set
	pub set: Option<Value>,
	/// Data to delete
	pub delete: Option<Value>,
}

/// The identifiers assigned to new nodes by a write, keyed by blank node name
pub type AssignedIds = HashMap<String, String>;

/// Rewrites mutations into backend writes.
pub trait MutationRewriter: Send + Sync {
	fn rewrite(&self, mutation: &Mutation) -> Result<BackendMutation>;

	/// Rewrite a delete into the query selecting the nodes, and the write removing them
	fn rewrite_delete(&self, mutation: &Mutation) -> Result<(BackendQuery, BackendMutation)>;
}

/// Builds the query which reads back the result of a write.
pub trait QueryRewriter: Send + Sync {
	fn from_mutation_result(
		&self,
		mutation: &Mutation,
		assigned: &AssignedIds,
	) -> Result<BackendQuery>;
}

/// Executes backend operations.
#[async_trait]
pub trait Client: Send + Sync {
	async fn mutate(&self, ctx: &Context, mutation: &BackendMutation) -> Result<AssignedIds>;

	async fn query(&self, ctx: &Context, query: &BackendQuery) -> Result<Vec<u8>>;

	async fn delete_nodes(
		&self,
		ctx: &Context,
		query: &BackendQuery,
		mutation: &BackendMutation,
	) -> Result<()>;
}

/// Shapes a backend response into the JSON of a selection.
#[async_trait]
pub trait ResultCompleter: Send + Sync {
	/// Returns the JSON fragment for the field, and any errors found along the way
	async fn complete(&self, ctx: &Context, field: &Field, response: &[u8]) -> (String, GqlErrors);
}

/// Checks the input of a mutation before it is rewritten.
pub trait InputValidator: Send + Sync {
	fn validate(&self, mutation: &Mutation) -> Result<()>;
}

/// Accepts every input.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoValidation;

impl InputValidator for NoValidation {
	fn validate(&self, _: &Mutation) -> Result<()> {
		Ok(())
	}
}
