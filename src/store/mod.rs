mod jsonl;
mod memory;

pub use jsonl::JsonlLog;
pub use memory::{InMemoryApplications, InMemoryAttemptLog, InMemoryAuditLog, InMemoryDocuments};
