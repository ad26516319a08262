//! Relocation and redirect behavior: transparency through stale ids,
//! the delete asymmetry that makes stale-extent reclamation safe, and the
//! counter identity every operation sequence must preserve.

use blobdb::storage::{collect, BlobStore, RecordId, WriteOutcome};
use blobdb::{DataLengthPlusFixedPercentStrategy, WriterDecidesStrategy};
use tempfile::TempDir;

fn open(dir: &TempDir) -> BlobStore {
    BlobStore::open(
        &dir.path().join("blobs.dat"),
        Box::new(WriterDecidesStrategy::new(8, 4096).unwrap()),
    )
    .unwrap()
}

fn put(store: &mut BlobStore, payload: &[u8]) -> RecordId {
    store
        .write_to_record(None, payload.len(), false, |buf| {
            buf.replace(payload);
            Ok(WriteOutcome::Written)
        })
        .unwrap()
}

fn overwrite(store: &mut BlobStore, id: RecordId, payload: &[u8], keep_redirect: bool) -> RecordId {
    store
        .write_to_record(Some(id), payload.len(), keep_redirect, |buf| {
            buf.replace(payload);
            Ok(WriteOutcome::Written)
        })
        .unwrap()
}

fn read(store: &mut BlobStore, id: RecordId) -> Vec<u8> {
    store.read_record(id, <[u8]>::to_vec).unwrap()
}

fn assert_identity(store: &mut BlobStore) {
    let stats = store.statistics().unwrap();
    assert_eq!(
        stats.records_allocated,
        stats.live_records_count + stats.records_relocated + stats.records_deleted,
        "every extent must sit in exactly one terminal bucket"
    );
    assert_eq!(stats, collect(store).unwrap(), "counters must match a full scan");
}

// The worked end-to-end scenario: grow past capacity, keep a redirect,
// reclaim the stale extent, and verify the new record is untouched.
#[test]
fn relocation_with_redirect_end_to_end() {
    let dir = TempDir::new().unwrap();
    let mut store = open(&dir);

    // "hello" fits the 8-byte default capacity.
    let a = put(&mut store, b"hello");
    assert_eq!(read(&mut store, a), b"hello");

    // "hello world!" (12 bytes) does not: the record relocates.
    let b = overwrite(&mut store, a, b"hello world!", true);
    assert_ne!(a, b);

    // The stale id stays transparent.
    assert_eq!(read(&mut store, a), b"hello world!");
    assert_eq!(read(&mut store, b), b"hello world!");
    assert_identity(&mut store);

    // Reclaiming the stale extent must not touch the relocated data.
    store.delete_record(a).unwrap();
    assert!(store.read_record(a, |_| ()).is_err());
    assert_eq!(read(&mut store, b), b"hello world!");

    // Double delete is misuse.
    let err = store.delete_record(a).unwrap_err();
    assert_eq!(err.code().code(), "BLOB_ILLEGAL_STATE");
    assert_eq!(read(&mut store, b), b"hello world!");
    assert_identity(&mut store);
}

#[test]
fn relocation_without_redirect_drops_the_old_id() {
    let dir = TempDir::new().unwrap();
    let mut store = open(&dir);

    let a = put(&mut store, b"small");
    let b = overwrite(&mut store, a, b"way past eight bytes", false);
    assert_ne!(a, b);

    // No marker left: the stale id no longer resolves.
    assert!(!store.has_record(a).unwrap());
    let err = store.read_record(a, |_| ()).unwrap_err();
    assert_eq!(err.code().code(), "BLOB_ILLEGAL_STATE");

    assert_eq!(read(&mut store, b), b"way past eight bytes");
    assert_identity(&mut store);
}

#[test]
fn redirect_chain_resolves_through_repeated_relocation() {
    let dir = TempDir::new().unwrap();
    let mut store = open(&dir);

    let first = put(&mut store, b"v1");
    let second = overwrite(&mut store, first, b"version two!", true);
    let third = overwrite(&mut store, first, b"version three, even longer", true);
    assert_ne!(second, third);

    // Every historical id reads the newest payload.
    for id in [first, second, third] {
        assert_eq!(read(&mut store, id), b"version three, even longer");
    }
    assert_identity(&mut store);
}

#[test]
fn resolved_reads_report_the_final_id_for_self_healing() {
    let dir = TempDir::new().unwrap();
    let mut store = open(&dir);

    let stale = put(&mut store, b"start");
    let current = overwrite(&mut store, stale, b"grown beyond capacity", true);

    let mut healed = stale;
    let payload = store
        .read_record_resolved(stale, &mut healed, <[u8]>::to_vec)
        .unwrap();
    assert_eq!(payload, b"grown beyond capacity");
    assert_eq!(healed, current);

    let mut healed_again = stale;
    assert!(store.has_record_resolved(stale, &mut healed_again).unwrap());
    assert_eq!(healed_again, current);

    // Reading through the healed id skips the chain.
    assert_eq!(read(&mut store, healed), b"grown beyond capacity");
}

#[test]
fn write_through_stale_id_lands_on_the_current_record() {
    let dir = TempDir::new().unwrap();
    let mut store = open(&dir);

    let stale = put(&mut store, b"origin");
    let current = overwrite(&mut store, stale, b"relocated contents", true);

    // An in-place rewrite via the stale id updates the current record.
    let returned = overwrite(&mut store, stale, b"patched", false);
    assert_eq!(returned, current);
    assert_eq!(read(&mut store, current), b"patched");
    assert_identity(&mut store);
}

#[test]
fn deleting_the_live_end_makes_the_whole_chain_dead() {
    let dir = TempDir::new().unwrap();
    let mut store = open(&dir);

    let stale = put(&mut store, b"root");
    let current = overwrite(&mut store, stale, b"longer than the extent", true);

    store.delete_record(current).unwrap();
    // The chain now ends at a deleted record: both ids report absent.
    assert!(!store.has_record(stale).unwrap());
    assert!(!store.has_record(current).unwrap());
    assert!(store.read_record(stale, |_| ()).is_err());
    assert_identity(&mut store);
}

#[test]
fn writing_to_a_deleted_record_is_misuse() {
    let dir = TempDir::new().unwrap();
    let mut store = open(&dir);

    let id = put(&mut store, b"doomed");
    store.delete_record(id).unwrap();

    let err = store
        .write_to_record(Some(id), 0, false, |buf| {
            buf.replace(b"necromancy");
            Ok(WriteOutcome::Written)
        })
        .unwrap_err();
    assert_eq!(err.code().code(), "BLOB_ILLEGAL_STATE");
}

#[test]
fn percent_strategy_leaves_room_for_growth() {
    let dir = TempDir::new().unwrap();
    let mut store = BlobStore::open(
        &dir.path().join("blobs.dat"),
        Box::new(DataLengthPlusFixedPercentStrategy::new(64, 8, 4096, 50).unwrap()),
    )
    .unwrap();

    let id = store
        .write_to_record(None, 0, true, |buf| {
            buf.replace(b"0123456789");
            Ok(WriteOutcome::Written)
        })
        .unwrap();

    // 10 bytes + 50% slack: appending a few bytes must not relocate.
    let same = store
        .write_to_record(Some(id), 0, true, |buf| {
            buf.extend_from_slice(b"abcd");
            Ok(WriteOutcome::Written)
        })
        .unwrap();
    assert_eq!(same, id);
    assert_eq!(read(&mut store, id), b"0123456789abcd");
}

#[test]
fn identity_holds_across_a_random_looking_workload() {
    let dir = TempDir::new().unwrap();
    let mut store = open(&dir);

    let mut ids = Vec::new();
    for i in 0..20usize {
        let payload = vec![b'a' + (i % 26) as u8; 1 + i];
        ids.push(put(&mut store, &payload));
    }
    // Grow every third record (relocates), delete every fifth.
    for (i, id) in ids.clone().into_iter().enumerate() {
        if i % 3 == 0 {
            let grown = vec![b'z'; 64 + i];
            let new_id = overwrite(&mut store, id, &grown, i % 2 == 0);
            ids[i] = new_id;
        }
    }
    for (i, id) in ids.iter().enumerate() {
        if i % 5 == 1 {
            store.delete_record(*id).unwrap();
        }
    }

    assert_identity(&mut store);
}
