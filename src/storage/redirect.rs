//! Redirect-chain resolution
//!
//! A relocated record leaves a marker behind that points at its new home;
//! markers can stack up if a record relocates repeatedly. Resolution walks
//! the chain to the live record or to a terminal dead end. The walk is
//! capped by the number of extents the file can physically hold, so a
//! cyclic chain (which only corruption can produce) is reported as
//! `BLOB_DATA_CORRUPTION` instead of looping forever.

use super::errors::{StorageError, StorageResult};
use super::file::StorageFile;
use super::record::{RecordId, RecordStatus};

/// Terminal state of a redirect walk.
#[derive(Debug)]
pub(crate) enum ResolvedRecord {
    /// Chain ended at a live record.
    Live {
        id: RecordId,
        capacity: usize,
        length: usize,
    },
    /// Chain ended at a deleted record.
    Deleted { id: RecordId },
    /// The starting id has never been allocated.
    Unallocated,
}

/// Follows redirect markers from `start` to the end of the chain.
///
/// A marker pointing at an unallocated id is corruption: relocation always
/// writes the target extent before the marker.
pub(crate) fn resolve_chain(
    file: &mut StorageFile,
    start: RecordId,
) -> StorageResult<ResolvedRecord> {
    if !file.is_id_allocated(start) {
        return Ok(ResolvedRecord::Unallocated);
    }

    let max_hops = file.max_possible_records();
    let mut current = start;
    let mut hops: u64 = 0;

    loop {
        let header = file.read_record_header(current)?;
        match header.status {
            RecordStatus::Live { length } => {
                return Ok(ResolvedRecord::Live {
                    id: current,
                    capacity: header.capacity,
                    length,
                })
            }
            RecordStatus::Deleted => return Ok(ResolvedRecord::Deleted { id: current }),
            RecordStatus::Redirected { to } => {
                if !file.is_id_allocated(to) {
                    return Err(StorageError::corruption(format!(
                        "record {} redirects to unallocated record {}",
                        current, to
                    )));
                }
                hops += 1;
                if hops > max_hops {
                    return Err(StorageError::corruption(format!(
                        "redirect chain starting at record {} exceeds {} hops, assuming a cycle",
                        start, max_hops
                    )));
                }
                current = to;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_in(dir: &TempDir) -> StorageFile {
        StorageFile::open(&dir.path().join("blobs.dat")).unwrap()
    }

    #[test]
    fn live_record_resolves_to_itself() {
        let dir = TempDir::new().unwrap();
        let mut file = open_in(&dir);
        let id = file.allocate_extent(b"payload", 8).unwrap();

        match resolve_chain(&mut file, id).unwrap() {
            ResolvedRecord::Live {
                id: resolved,
                capacity,
                length,
            } => {
                assert_eq!(resolved, id);
                assert_eq!(capacity, 8);
                assert_eq!(length, 7);
            }
            other => panic!("expected live record, got {:?}", other),
        }
    }

    #[test]
    fn chain_of_markers_resolves_to_final_record() {
        let dir = TempDir::new().unwrap();
        let mut file = open_in(&dir);
        let a = file.allocate_extent(b"1st", 8).unwrap();
        let b = file.allocate_extent(b"2nd", 8).unwrap();
        let c = file.allocate_extent(b"3rd", 8).unwrap();
        file.mark_relocated(a, 8, 3, b).unwrap();
        file.mark_relocated(b, 8, 3, c).unwrap();

        match resolve_chain(&mut file, a).unwrap() {
            ResolvedRecord::Live { id, .. } => assert_eq!(id, c),
            other => panic!("expected live record, got {:?}", other),
        }
    }

    #[test]
    fn chain_ending_in_deleted_record() {
        let dir = TempDir::new().unwrap();
        let mut file = open_in(&dir);
        let a = file.allocate_extent(b"1st", 8).unwrap();
        let b = file.allocate_extent(b"2nd", 8).unwrap();
        file.mark_relocated(a, 8, 3, b).unwrap();
        file.mark_deleted_live(b, 8, 3).unwrap();

        match resolve_chain(&mut file, a).unwrap() {
            ResolvedRecord::Deleted { id } => assert_eq!(id, b),
            other => panic!("expected deleted end, got {:?}", other),
        }
    }

    #[test]
    fn unallocated_start_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let mut file = open_in(&dir);
        let id = RecordId::new(500).unwrap();

        assert!(matches!(
            resolve_chain(&mut file, id).unwrap(),
            ResolvedRecord::Unallocated
        ));
    }

    #[test]
    fn cycle_is_detected_as_corruption() {
        let dir = TempDir::new().unwrap();
        let mut file = open_in(&dir);
        let a = file.allocate_extent(b"1st", 8).unwrap();
        let b = file.allocate_extent(b"2nd", 8).unwrap();
        file.mark_relocated(a, 8, 3, b).unwrap();
        file.mark_relocated(b, 8, 3, a).unwrap();

        let err = resolve_chain(&mut file, a).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.message().contains("cycle"));
    }
}
