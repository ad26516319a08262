//! Blob storage subsystem
//!
//! A single-file, record-oriented store: one fixed header, then record
//! extents back to back. A record id is derived from its byte offset, so
//! no id->offset index exists anywhere.
//!
//! # Design Principles
//!
//! - Ids are offsets: dense, stable while a record stays in place
//! - Relocation leaves a transparent redirect marker behind
//! - Writes go through caller-supplied buffer callbacks
//! - Every invariant violation fails fast; nothing is repaired silently
//! - The closed-properly stamp makes crashes observable at open time

mod checksum;
mod errors;
mod file;
mod header;
mod record;
mod redirect;
mod stats;
mod store;

pub use checksum::compute_checksum;
pub use errors::{Severity, StorageError, StorageErrorCode, StorageResult};
pub use header::STORAGE_VERSION_CURRENT;
pub use record::{RecordId, RecordStatus, MAX_CAPACITY, MAX_PAYLOAD};
pub use stats::{collect, StorageStats};
pub use store::{BlobStore, RecordView, WriteBuf, WriteOutcome};
