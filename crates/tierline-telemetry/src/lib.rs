//! Dispatch audit records, file I/O helpers, and path resolution

mod audit;
mod io;
mod paths;
mod tokens;
mod types;

pub use audit::{AuditError, AuditSink, JsonlAuditLog};
pub use io::{append_jsonl, append_jsonl_all, atomic_write, read_jsonl, read_jsonl_tail};
pub use paths::Paths;
pub use tokens::{estimate_tokens, truncate_chars};
pub use types::{DispatchOutcome, DispatchRecord};
