use crate::ctx::Context;
use crate::gql::error::GqlErrors;
use crate::gql::mutation::{MutationResolver, Resolved};
use crate::gql::schema::Mutation;

/// The combined result of the mutation fields of one operation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MutationResponse {
	/// The results of every field which was attempted, in order
	pub results: Vec<Resolved>,
	/// Whether every attempted field succeeded
	pub succeeded: bool,
}

impl MutationResponse {
	/// The errors of every attempted field, in order
	pub fn errors(&self) -> GqlErrors {
		let mut errors = GqlErrors::new();
		for res in &self.results {
			errors.extend(res.errors.iter().cloned());
		}
		errors
	}

	/// Render the response in the GraphQL wire format
	pub fn to_json(&self) -> Result<String, serde_json::Error> {
		let mut out = String::from("{\"data\": ");
		match self.results.is_empty() {
			true => out.push_str("null"),
			false => {
				out.push('{');
				for (i, res) in self.results.iter().enumerate() {
					if i > 0 {
						out.push_str(", ");
					}
					out.push_str(&res.data);
				}
				out.push('}');
			}
		}
		let errors = self.errors();
		if !errors.is_empty() {
			out.push_str(", \"errors\": ");
			out.push_str(&serde_json::to_string(&errors)?);
		}
		out.push('}');
		Ok(out)
	}
}

/// Resolve the mutation fields of an operation, one after another.
///
/// Resolution stops at the first field whose mutation did not take effect, and
/// later fields are never attempted. Results already computed for earlier
/// fields are kept, even when the failed field is non-nullable.
pub async fn resolve_mutations(
	resolver: &MutationResolver,
	ctx: &Context,
	mutations: &[Mutation],
) -> MutationResponse {
	let mut response = MutationResponse {
		results: Vec::with_capacity(mutations.len()),
		succeeded: true,
	};
	for mutation in mutations {
		let (res, succeeded) = resolver.resolve(ctx, mutation).await;
		response.results.push(res);
		if !succeeded {
			debug!(
				target: "graphwrite::gql",
				field = mutation.response_name(),
				skipped = mutations.len() - response.results.len(),
				"Mutation failed, skipping the remaining fields"
			);
			response.succeeded = false;
			break;
		}
	}
	response
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use serde_json::{Value, json};

	use super::*;
	use crate::gql::test::{EchoCompleter, RecordingRewriter, ScriptedClient, add, delete};

	#[test_log::test(tokio::test)]
	async fn stops_at_the_first_failed_mutation() {
		let rewriter = Arc::new(RecordingRewriter::default());
		let client = Arc::new(ScriptedClient::default().fail_mutate("second"));
		let resolver = MutationResolver::new(
			rewriter.clone(),
			rewriter.clone(),
			client.clone(),
			Arc::new(EchoCompleter::default()),
		);
		let mutations = [add("first"), add("second"), add("third")];
		let response = resolve_mutations(&resolver, &Context::background(), &mutations).await;
		assert!(!response.succeeded);
		assert_eq!(client.mutate_calls(), 2);
		assert_eq!(rewriter.rewritten(), vec!["first", "second"]);
		assert_eq!(response.results.len(), 2);
		assert_eq!(response.results[0].data, r#""first": {"post":[{"id":"0x1"}]}"#);
		assert!(response.results[0].errors.is_empty());
		assert_eq!(response.results[1].data, r#""second": null"#);
		assert_eq!(response.results[1].errors.len(), 1);
		let json: Value = serde_json::from_str(&response.to_json().unwrap()).unwrap();
		assert_eq!(
			json,
			json!({
				"data": { "first": { "post": [{ "id": "0x1" }] }, "second": null },
				"errors": [{
					"message": "mutation second failed: backend refused mutation second",
					"locations": [{ "line": 2, "column": 3 }],
				}],
			})
		);
	}

	#[test_log::test(tokio::test)]
	async fn follow_up_failures_do_not_stop_the_operation() {
		let rewriter = Arc::new(RecordingRewriter::default());
		let client = Arc::new(ScriptedClient::default().fail_query());
		let completer = Arc::new(EchoCompleter::default());
		let resolver = MutationResolver::new(rewriter.clone(), rewriter, client.clone(), completer);
		let mutations = [add("first"), delete("second")];
		let response = resolve_mutations(&resolver, &Context::background(), &mutations).await;
		assert!(response.succeeded);
		assert_eq!(client.mutate_calls(), 1);
		assert_eq!(client.delete_calls(), 1);
		let json: Value = serde_json::from_str(&response.to_json().unwrap()).unwrap();
		assert_eq!(json["data"], json!({ "first": null, "second": { "msg": "Deleted" } }));
		assert_eq!(json["errors"].as_array().map(Vec::len), Some(1));
	}

	#[test]
	fn renders_null_data_without_results() {
		let response = MutationResponse::default();
		assert_eq!(response.to_json().unwrap(), r#"{"data": null}"#);
	}
}
