use std::sync::Arc;

use crate::cnf::DELETE_RESPONSE;
use crate::ctx::Context;
use crate::gql::backend::{
	Client, InputValidator, MutationRewriter, NoValidation, QueryRewriter, ResultCompleter,
};
use crate::gql::error::{GqlError, GqlErrors};
use crate::gql::schema::{Mutation, MutationType};

/// The mutation never took effect
pub const MUTATION_FAILED: bool = false;
/// The mutation took effect, even if its result could not be shown
pub const MUTATION_SUCCEEDED: bool = true;

/// The result of resolving a single field.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Resolved {
	/// A JSON fragment, which is empty when there is no data
	pub data: String,
	pub errors: GqlErrors,
}

impl Resolved {
	fn failed(errors: GqlErrors) -> Self {
		Self {
			data: String::new(),
			errors,
		}
	}
}

/// Resolves mutation fields against a backend.
#[derive(Clone)]
pub struct MutationResolver {
	mutation_rewriter: Arc<dyn MutationRewriter>,
	query_rewriter: Arc<dyn QueryRewriter>,
	client: Arc<dyn Client>,
	completer: Arc<dyn ResultCompleter>,
	validator: Arc<dyn InputValidator>,
}

impl MutationResolver {
	pub fn new(
		mutation_rewriter: Arc<dyn MutationRewriter>,
		query_rewriter: Arc<dyn QueryRewriter>,
		client: Arc<dyn Client>,
		completer: Arc<dyn ResultCompleter>,
	) -> Self {
		Self {
			mutation_rewriter,
			query_rewriter,
			client,
			completer,
			validator: Arc::new(NoValidation),
		}
	}

	/// Set the validator which checks the input of update mutations
	pub fn with_validator(mut self, validator: Arc<dyn InputValidator>) -> Self {
		self.validator = validator;
		self
	}

	/// Resolve a single mutation field.
	///
	/// The returned flag is [`MUTATION_SUCCEEDED`] when the write itself was
	/// applied, even when reading back its result failed. The data is always
	/// wrapped under the field's response name, and every non-empty error path
	/// starts with the response name.
	pub async fn resolve(&self, ctx: &Context, mutation: &Mutation) -> (Resolved, bool) {
		let (mut res, succeeded) = match mutation.kind() {
			MutationType::Add => self.resolve_mutation(ctx, mutation).await,
			MutationType::Update => match self.validator.validate(mutation) {
				Ok(()) => self.resolve_mutation(ctx, mutation).await,
				Err(e) => {
					let context = format!("mutation {} has invalid input", mutation.name());
					(Resolved::failed(GqlErrors::wrap(e, context)), MUTATION_FAILED)
				}
			},
			MutationType::Delete => self.resolve_delete_mutation(ctx, mutation).await,
			MutationType::Custom(_) => {
				let err = GqlError::new("Only add, delete and update mutations are implemented");
				(Resolved::failed(err.into()), MUTATION_FAILED)
			}
		};
		// The resolved data is the nested query field, which sits under the mutation field
		let name = mutation.response_name();
		let data = match res.data.is_empty() {
			true => "null",
			false => res.data.as_str(),
		};
		res.data = format!("\"{name}\": {data}");
		res.errors.prefix_paths(name);
		(res, succeeded)
	}

	#[instrument(
		level = "debug",
		target = "graphwrite::gql",
		name = "resolve_mutation",
		skip_all,
		fields(alias = mutation.alias(), kind = %mutation.kind())
	)]
	async fn resolve_mutation(&self, ctx: &Context, mutation: &Mutation) -> (Resolved, bool) {
		let mu = match self.mutation_rewriter.rewrite(mutation) {
			Ok(mu) => mu,
			Err(e) => {
				let errors = GqlErrors::wrap(e, "couldn't rewrite mutation");
				return (Resolved::failed(errors), MUTATION_FAILED);
			}
		};
		let assigned = match ctx.run(self.client.mutate(ctx, &mu)).await {
			Ok(assigned) => assigned,
			Err(e) => {
				let context = format!("mutation {} failed", mutation.name());
				let errors = GqlErrors::wrap_location(e, mutation.location(), context);
				return (Resolved::failed(errors), MUTATION_FAILED);
			}
		};
		trace!(target: "graphwrite::gql", assigned = assigned.len(), "Mutation applied");
		let query = match self.query_rewriter.from_mutation_result(mutation, &assigned) {
			Ok(query) => query,
			Err(e) => {
				let context = format!("couldn't rewrite mutation {}", mutation.name());
				return (Resolved::failed(GqlErrors::wrap(e, context)), MUTATION_SUCCEEDED);
			}
		};
		let response = match ctx.run(self.client.query(ctx, &query)).await {
			Ok(response) => response,
			Err(e) => {
				let context =
					format!("mutation {} created a node but query failed", mutation.name());
				return (Resolved::failed(GqlErrors::wrap(e, context)), MUTATION_SUCCEEDED);
			}
		};
		let (data, errors) = self.completer.complete(ctx, mutation.query_field(), &response).await;
		(
			Resolved {
				data,
				errors,
			},
			MUTATION_SUCCEEDED,
		)
	}

	#[instrument(
		level = "debug",
		target = "graphwrite::gql",
		name = "resolve_delete_mutation",
		skip_all,
		fields(alias = mutation.alias(), kind = %mutation.kind())
	)]
	async fn resolve_delete_mutation(
		&self,
		ctx: &Context,
		mutation: &Mutation,
	) -> (Resolved, bool) {
		let (query, mu) = match self.mutation_rewriter.rewrite_delete(mutation) {
			Ok(v) => v,
			Err(e) => {
				let errors = GqlErrors::wrap(e, "couldn't rewrite mutation");
				return (Resolved::failed(errors), MUTATION_FAILED);
			}
		};
		if let Err(e) = ctx.run(self.client.delete_nodes(ctx, &query, &mu)).await {
			let context = format!("mutation {} failed", mutation.name());
			return (Resolved::failed(GqlErrors::wrap(e, context)), MUTATION_FAILED);
		}
		(
			Resolved {
				data: DELETE_RESPONSE.to_owned(),
				errors: GqlErrors::new(),
			},
			MUTATION_SUCCEEDED,
		)
	}
}
