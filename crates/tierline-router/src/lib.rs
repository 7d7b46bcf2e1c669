//! Request routing: classification, dedup, context tiering, and cascade
//! dispatch over cost-tiered backends

mod executor;
mod response;
mod router;

pub use executor::{BackendExecutor, CommandExecutor, ExecutionError, ExecutionResult};
pub use response::{Invalidation, RouteResponse, RouterStatus};
pub use router::{BuildError, Router, RouterBuilder};
