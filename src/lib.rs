//! blobdb - a compact, crash-aware, single-file blob storage engine
//!
//! Maps a dense integer `RecordId` directly onto a byte offset, so no
//! secondary id->offset index is needed. Records can be rewritten in place,
//! or relocated with a transparent redirect left behind.

pub mod alloc;
pub mod observability;
pub mod storage;

pub use alloc::{DataLengthPlusFixedPercentStrategy, SpaceAllocationStrategy, WriterDecidesStrategy};
pub use storage::{BlobStore, RecordId, RecordStatus, StorageError, StorageResult};
