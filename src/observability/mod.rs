//! Observability for blobdb
//!
//! Structured, deterministic logging only:
//!
//! 1. Observability is read-only
//! 2. No side effects on storage operations
//! 3. No async or background threads
//! 4. Deterministic output
//!
//! Operational counters are not logged; they live in the storage header and
//! surface through `storage::StorageStats`.

mod logger;

pub use logger::{Logger, Severity};
