//! Storage file header
//!
//! Fixed 48-byte little-endian header at offset 0:
//!
//! ```text
//! +---------------------+
//! | Magic               | (4 bytes, "BLOB")
//! +---------------------+
//! | Storage Version     | (u32 LE, engine-owned)
//! +---------------------+
//! | File Status         | (u32 LE: 0 = opened, 1 = safely closed)
//! +---------------------+
//! | Records Allocated   | (u32 LE)
//! +---------------------+
//! | Records Relocated   | (u32 LE)
//! +---------------------+
//! | Records Deleted     | (u32 LE)
//! +---------------------+
//! | Live Payload Bytes  | (u64 LE)
//! +---------------------+
//! | Live Capacity Bytes | (u64 LE)
//! +---------------------+
//! | Data Format Version | (u32 LE, caller-owned)
//! +---------------------+
//! | Header Checksum     | (u32 LE, CRC32 of the preceding 44 bytes)
//! +---------------------+
//! ```
//!
//! The status field is stamped `Opened` right after a successful open and
//! `SafelyClosed` only by a clean close, so a crash is observable on the
//! next open. The checksum is refreshed whenever the header is persisted
//! and verified on open only when the file claims a clean shutdown; after
//! an unclean shutdown the counters are advisory, like the flag itself.

use super::checksum::{compute_checksum, verify_checksum};
use super::errors::{StorageError, StorageResult};

/// Version of the persistent format owned by this engine.
pub const STORAGE_VERSION_CURRENT: u32 = 1;

/// On-disk size of the fixed header.
pub(crate) const HEADER_SIZE: usize = 48;

/// First record extent starts here; already a multiple of the offset bucket.
pub(crate) const RECORDS_START_OFFSET: u64 = HEADER_SIZE as u64;

const MAGIC: [u8; 4] = *b"BLOB";

const CHECKSUM_OFFSET: usize = HEADER_SIZE - 4;

/// Persisted open/close state of the storage file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FileStatus {
    /// File is (or was last) open for writing.
    Opened,
    /// File was flushed and closed cleanly.
    SafelyClosed,
}

impl FileStatus {
    fn from_raw(raw: u32) -> Option<FileStatus> {
        match raw {
            0 => Some(FileStatus::Opened),
            1 => Some(FileStatus::SafelyClosed),
            _ => None,
        }
    }

    fn to_raw(self) -> u32 {
        match self {
            FileStatus::Opened => 0,
            FileStatus::SafelyClosed => 1,
        }
    }
}

/// Running record counters, persisted in the header.
///
/// Every extent is in exactly one terminal bucket, so
/// `records_allocated = live + records_relocated + records_deleted` holds
/// after any sequence of operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct RecordCounters {
    pub records_allocated: u32,
    pub records_relocated: u32,
    pub records_deleted: u32,
    pub live_payload_bytes: u64,
    pub live_capacity_bytes: u64,
}

impl RecordCounters {
    /// Number of records still holding payload.
    ///
    /// Saturating: a corrupt header cannot make this panic, only read as 0.
    pub fn live_records_count(&self) -> u32 {
        self.records_allocated
            .saturating_sub(self.records_relocated)
            .saturating_sub(self.records_deleted)
    }
}

/// Decoded fixed header of the storage file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FileHeader {
    pub storage_version: u32,
    pub file_status: FileStatus,
    pub counters: RecordCounters,
    pub data_format_version: u32,
}

impl FileHeader {
    /// Fresh header for a newly created file.
    pub fn new() -> FileHeader {
        FileHeader {
            storage_version: STORAGE_VERSION_CURRENT,
            file_status: FileStatus::Opened,
            counters: RecordCounters::default(),
            data_format_version: 0,
        }
    }

    /// Serializes the header, stamping the trailing checksum.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..8].copy_from_slice(&self.storage_version.to_le_bytes());
        buf[8..12].copy_from_slice(&self.file_status.to_raw().to_le_bytes());
        buf[12..16].copy_from_slice(&self.counters.records_allocated.to_le_bytes());
        buf[16..20].copy_from_slice(&self.counters.records_relocated.to_le_bytes());
        buf[20..24].copy_from_slice(&self.counters.records_deleted.to_le_bytes());
        buf[24..32].copy_from_slice(&self.counters.live_payload_bytes.to_le_bytes());
        buf[32..40].copy_from_slice(&self.counters.live_capacity_bytes.to_le_bytes());
        buf[40..44].copy_from_slice(&self.data_format_version.to_le_bytes());
        let checksum = compute_checksum(&buf[..CHECKSUM_OFFSET]);
        buf[CHECKSUM_OFFSET..].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// Parses and validates a header.
    ///
    /// A broken magic or status field is `BLOB_DATA_CORRUPTION`; a checksum
    /// mismatch is reported the same way, but only when the file claims a
    /// clean shutdown (an unclean header is legitimately stale). The engine
    /// version is checked right after the magic: a file from a different
    /// revision fails with `BLOB_VERSION_MISMATCH` before any field whose
    /// layout that revision may have changed is interpreted.
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> StorageResult<FileHeader> {
        if buf[0..4] != MAGIC {
            return Err(StorageError::corruption(format!(
                "bad magic {:02x?}, not a blob storage file",
                &buf[0..4]
            )));
        }

        let storage_version = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if storage_version != STORAGE_VERSION_CURRENT {
            return Err(StorageError::version_mismatch(
                storage_version,
                STORAGE_VERSION_CURRENT,
            ));
        }

        let status_raw = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        let file_status = FileStatus::from_raw(status_raw).ok_or_else(|| {
            StorageError::corruption(format!("unknown file status {}", status_raw))
        })?;

        let counters = RecordCounters {
            records_allocated: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
            records_relocated: u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]),
            records_deleted: u32::from_le_bytes([buf[20], buf[21], buf[22], buf[23]]),
            live_payload_bytes: u64::from_le_bytes([
                buf[24], buf[25], buf[26], buf[27], buf[28], buf[29], buf[30], buf[31],
            ]),
            live_capacity_bytes: u64::from_le_bytes([
                buf[32], buf[33], buf[34], buf[35], buf[36], buf[37], buf[38], buf[39],
            ]),
        };
        let data_format_version = u32::from_le_bytes([buf[40], buf[41], buf[42], buf[43]]);

        if file_status == FileStatus::SafelyClosed {
            let stored = u32::from_le_bytes([
                buf[CHECKSUM_OFFSET],
                buf[CHECKSUM_OFFSET + 1],
                buf[CHECKSUM_OFFSET + 2],
                buf[CHECKSUM_OFFSET + 3],
            ]);
            if !verify_checksum(&buf[..CHECKSUM_OFFSET], stored) {
                return Err(StorageError::corruption(format!(
                    "header checksum mismatch: computed {:08x}, stored {:08x}",
                    compute_checksum(&buf[..CHECKSUM_OFFSET]),
                    stored
                )));
            }
        }

        Ok(FileHeader {
            storage_version,
            file_status,
            counters,
            data_format_version,
        })
    }
}
