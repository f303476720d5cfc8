//! Per-request cancellation and deadlines.

mod canceller;
mod context;
mod reason;

pub use self::canceller::Canceller;
pub use self::context::Context;
pub use self::reason::Reason;
