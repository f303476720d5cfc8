//! Resolution of GraphQL mutation fields.
//!
//! Each mutation field is rewritten into a backend write, applied, read back
//! with a follow-up query, and completed against its selection. The fields of
//! one operation run serially, and stop at the first failed write.

pub mod backend;
pub mod error;
pub mod mutation;
pub mod operation;
pub mod schema;


pub use self::backend::{
	AssignedIds, BackendMutation, BackendQuery, Client, InputValidator, MutationRewriter,
	NoValidation, QueryRewriter, ResultCompleter,
};
pub use self::error::{GqlError, GqlErrors};
pub use self::mutation::{MUTATION_FAILED, MUTATION_SUCCEEDED, MutationResolver, Resolved};
pub use self::operation::{MutationResponse, resolve_mutations};
pub use self::schema::{Field, Mutation, MutationType};
