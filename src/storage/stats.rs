//! Storage statistics
//!
//! Two views of the same numbers: `BlobStore::statistics` snapshots the
//! running counters the header maintains, and `collect` recomputes them by
//! an ascending scan over every extent. The two must agree on a cleanly
//! maintained file, which makes `collect` the consistency check the layer
//! above runs when `was_closed_properly` comes back `false`.

use serde::Serialize;

use super::errors::StorageResult;
use super::header::RecordCounters;
use super::record::RecordStatus;
use super::store::BlobStore;

/// Point-in-time statistics of a storage file.
///
/// `records_allocated = live_records_count + records_relocated +
/// records_deleted`: every extent is in exactly one terminal bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    /// Records currently holding payload
    pub live_records_count: u32,
    /// Extents ever allocated
    pub records_allocated: u32,
    /// Extents left behind as redirect markers
    pub records_relocated: u32,
    /// Extents marked deleted
    pub records_deleted: u32,
    /// Logical file size in bytes
    pub size_in_bytes: u64,
    /// Payload bytes held by live records
    pub total_live_payload_bytes: u64,
    /// Capacity bytes reserved by live records
    pub total_live_capacity_bytes: u64,
}

impl StorageStats {
    pub(crate) fn from_counters(counters: &RecordCounters, size_in_bytes: u64) -> StorageStats {
        StorageStats {
            live_records_count: counters.live_records_count(),
            records_allocated: counters.records_allocated,
            records_relocated: counters.records_relocated,
            records_deleted: counters.records_deleted,
            size_in_bytes,
            total_live_payload_bytes: counters.live_payload_bytes,
            total_live_capacity_bytes: counters.live_capacity_bytes,
        }
    }
}

/// Recomputes statistics by scanning every extent in ascending offset order.
///
/// Derived, never authoritative: the scan trusts record headers, not the
/// file header's counters.
pub fn collect(store: &mut BlobStore) -> StorageResult<StorageStats> {
    let mut live: u32 = 0;
    let mut relocated: u32 = 0;
    let mut deleted: u32 = 0;
    let mut payload_bytes: u64 = 0;
    let mut capacity_bytes: u64 = 0;

    store.for_each(|record| {
        match record.status {
            RecordStatus::Live { length } => {
                live += 1;
                payload_bytes += length as u64;
                capacity_bytes += record.capacity as u64;
            }
            RecordStatus::Redirected { .. } => relocated += 1,
            RecordStatus::Deleted => deleted += 1,
        }
        true
    })?;

    Ok(StorageStats {
        live_records_count: live,
        records_allocated: live + relocated + deleted,
        records_relocated: relocated,
        records_deleted: deleted,
        size_in_bytes: store.size_in_bytes(),
        total_live_payload_bytes: payload_bytes,
        total_live_capacity_bytes: capacity_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::WriterDecidesStrategy;
    use crate::storage::store::WriteOutcome;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> BlobStore {
        BlobStore::open(
            &dir.path().join("blobs.dat"),
            Box::new(WriterDecidesStrategy::new(64, 1024).unwrap()),
        )
        .unwrap()
    }

    fn put(store: &mut BlobStore, payload: &[u8]) -> crate::storage::RecordId {
        store
            .write_to_record(None, payload.len(), false, |buf| {
                buf.replace(payload);
                Ok(WriteOutcome::Written)
            })
            .unwrap()
    }

    #[test]
    fn empty_store_stats() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);

        let stats = store.statistics().unwrap();
        assert_eq!(stats.records_allocated, 0);
        assert_eq!(stats.live_records_count, 0);
        assert_eq!(stats, collect(&mut store).unwrap());
    }

    #[test]
    fn snapshot_and_scan_agree_after_mixed_operations() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);

        let a = put(&mut store, b"aaaa");
        let _b = put(&mut store, b"bbbbbbbb");
        let c = put(&mut store, b"cc");
        store.delete_record(c).unwrap();

        // Grow `a` past its capacity so it relocates with a marker.
        let grown = vec![0x61u8; 100];
        store
            .write_to_record(Some(a), grown.len(), true, |buf| {
                buf.replace(&grown);
                Ok(WriteOutcome::Written)
            })
            .unwrap();

        let snapshot = store.statistics().unwrap();
        let scanned = collect(&mut store).unwrap();
        assert_eq!(snapshot, scanned);
        assert_eq!(
            snapshot.records_allocated,
            snapshot.live_records_count + snapshot.records_relocated + snapshot.records_deleted
        );
    }

    #[test]
    fn stats_serialize_to_json() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);
        put(&mut store, b"payload");

        let json = serde_json::to_value(store.statistics().unwrap()).unwrap();
        assert_eq!(json["records_allocated"], 1);
        assert_eq!(json["live_records_count"], 1);
    }
}
