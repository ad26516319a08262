//! Storage file abstraction
//!
//! Owns the single backing file: the fixed header, the append cursor, and
//! every byte of every record extent. Translates record ids to byte offsets
//! and exposes extent-level reads and writes; all policy (redirect
//! resolution, allocation sizing, lifecycle) lives above, in the store.
//!
//! Extents are contiguous from `RECORDS_START_OFFSET`, each one
//! header + capacity bytes, capacities bucket-aligned, so the id of the
//! next record is always derivable from the file length alone. The file is
//! grown to the full extent end at allocation time, which keeps that
//! derivation exact across reopen.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::errors::{StorageError, StorageResult};
use super::header::{FileHeader, FileStatus, RecordCounters, HEADER_SIZE, RECORDS_START_OFFSET};
use super::record::{
    id_to_offset, offset_to_id, RecordHeader, RecordId, RecordStatus, MAX_CAPACITY, OFFSET_BUCKET,
    RECORD_HEADER_SIZE,
};

#[derive(Debug)]
pub(crate) struct StorageFile {
    /// Path to the storage file
    path: PathBuf,
    /// Underlying file handle
    file: File,
    /// Cached header; persisted on force/close
    header: FileHeader,
    /// Status observed at open time, before it was stamped `Opened`
    was_closed_properly: bool,
    /// Offset of the next extent to allocate (= logical end of file)
    next_offset: u64,
    /// Reusable payload read buffer
    scratch: Vec<u8>,
    /// Unflushed mutations exist
    dirty: bool,
}

impl StorageFile {
    /// Opens or creates the storage file.
    ///
    /// On an existing file the header is validated (magic, status, checksum
    /// when cleanly closed) and the engine version is rejected with
    /// `BLOB_VERSION_MISMATCH` if it differs. The status is then stamped
    /// `Opened` and flushed, so a later crash is observable on reopen.
    pub fn open(path: &Path) -> StorageResult<StorageFile> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    StorageError::io(
                        format!("failed to create storage directory: {}", parent.display()),
                        e,
                    )
                })?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| {
                StorageError::io(format!("failed to open storage file: {}", path.display()), e)
            })?;

        let file_len = file
            .metadata()
            .map_err(|e| StorageError::io("failed to read storage file metadata", e))?
            .len();

        let mut storage = StorageFile {
            path: path.to_path_buf(),
            file,
            header: FileHeader::new(),
            was_closed_properly: true,
            next_offset: RECORDS_START_OFFSET,
            scratch: Vec::new(),
            dirty: false,
        };

        if file_len == 0 {
            // Fresh file: lay down the header before any record exists.
            storage.write_header_to_disk()?;
            storage.sync()?;
            return Ok(storage);
        }

        if file_len < HEADER_SIZE as u64 {
            return Err(StorageError::corruption(format!(
                "storage file is {} bytes, smaller than the {}-byte header",
                file_len, HEADER_SIZE
            )));
        }

        let mut buf = [0u8; HEADER_SIZE];
        storage.read_exact_at(0, &mut buf, "failed to read storage header")?;
        let header = FileHeader::decode(&buf)?;

        storage.was_closed_properly = header.file_status == FileStatus::SafelyClosed;
        storage.header = header;
        storage.header.file_status = FileStatus::Opened;
        storage.next_offset = align_up_to_bucket(file_len.max(RECORDS_START_OFFSET));

        // Stamp `Opened` immediately: until the next clean close the file
        // must read as possibly inconsistent.
        storage.write_header_to_disk()?;
        storage.sync()?;

        Ok(storage)
    }

    /// Returns the path to the storage file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Status observed at open time: `false` signals an unclean shutdown.
    pub fn was_closed_properly(&self) -> bool {
        self.was_closed_properly
    }

    pub fn storage_version(&self) -> u32 {
        self.header.storage_version
    }

    pub fn data_format_version(&self) -> u32 {
        self.header.data_format_version
    }

    /// Updates the caller-owned format version; persisted immediately,
    /// durable at the next force/close.
    pub fn set_data_format_version(&mut self, version: u32) -> StorageResult<()> {
        self.header.data_format_version = version;
        self.dirty = true;
        self.write_header_to_disk()
    }

    pub fn counters(&self) -> &RecordCounters {
        &self.header.counters
    }

    pub fn counters_mut(&mut self) -> &mut RecordCounters {
        self.dirty = true;
        &mut self.header.counters
    }

    /// Logical size: end offset of the last allocated extent.
    pub fn size_in_bytes(&self) -> u64 {
        self.next_offset
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether `id` names an extent that has ever been allocated.
    pub fn is_id_allocated(&self, id: RecordId) -> bool {
        id_to_offset(id) < self.next_offset
    }

    /// Upper bound on how many extents the file can hold, from its size
    /// alone. Used to cap redirect-chain walks even when the persisted
    /// counters are stale after an unclean shutdown.
    pub fn max_possible_records(&self) -> u64 {
        (self.next_offset - RECORDS_START_OFFSET) / (RECORD_HEADER_SIZE + OFFSET_BUCKET) as u64 + 1
    }

    /// Reads and validates the extent header of `id`.
    ///
    /// The caller must have checked `is_id_allocated`; a read that runs off
    /// the end of the file is reported as corruption, not as absence.
    pub fn read_record_header(&mut self, id: RecordId) -> StorageResult<RecordHeader> {
        let offset = id_to_offset(id);
        debug_assert!(offset < self.next_offset);

        let mut buf = [0u8; RECORD_HEADER_SIZE];
        self.read_exact_at(offset, &mut buf, "failed to read record header")?;
        RecordHeader::decode(&buf, offset)
    }

    /// Reads `length` payload bytes of `id` into the scratch buffer and
    /// returns them as a read-only view.
    pub fn payload_slice(&mut self, id: RecordId, length: usize) -> StorageResult<&[u8]> {
        let offset = id_to_offset(id) + RECORD_HEADER_SIZE as u64;
        self.scratch.resize(length, 0);
        let mut buf = std::mem::take(&mut self.scratch);
        let read = self.read_exact_at(offset, &mut buf, "failed to read record payload");
        self.scratch = buf;
        read?;
        Ok(&self.scratch)
    }

    /// Appends a new extent holding `payload`, reserving `capacity` bytes.
    ///
    /// The payload and header are written before the file is grown to the
    /// extent end, so the extent is never readable as live before its bytes
    /// are in place. Counters are updated for the allocation.
    pub fn allocate_extent(&mut self, payload: &[u8], capacity: usize) -> StorageResult<RecordId> {
        debug_assert!(!payload.is_empty() && payload.len() <= capacity);
        debug_assert!(capacity <= MAX_CAPACITY && capacity % OFFSET_BUCKET == 0);

        let offset = self.next_offset;
        let id = offset_to_id(offset)?;

        let header = RecordHeader {
            capacity,
            status: RecordStatus::Live {
                length: payload.len(),
            },
        };

        let mut extent = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len());
        extent.extend_from_slice(&header.encode());
        extent.extend_from_slice(payload);
        self.write_all_at(offset, &extent, "failed to write new record extent")?;

        let extent_end = offset + (RECORD_HEADER_SIZE + capacity) as u64;
        self.file
            .set_len(extent_end)
            .map_err(|e| StorageError::io("failed to grow storage file", e))?;

        let counters = self.counters_mut();
        counters.records_allocated += 1;
        counters.live_payload_bytes += payload.len() as u64;
        counters.live_capacity_bytes += capacity as u64;

        self.next_offset = extent_end;
        Ok(id)
    }

    /// Rewrites the payload of a live record in place; `payload` must fit
    /// the extent's capacity. Payload bytes land before the length field,
    /// so a crash in between leaves the old length and a partially updated
    /// payload region, never a length pointing past valid data.
    pub fn update_live_payload(
        &mut self,
        id: RecordId,
        capacity: usize,
        old_length: usize,
        payload: &[u8],
    ) -> StorageResult<()> {
        debug_assert!(!payload.is_empty() && payload.len() <= capacity);

        let offset = id_to_offset(id);
        self.write_all_at(
            offset + RECORD_HEADER_SIZE as u64,
            payload,
            "failed to rewrite record payload",
        )?;

        let header = RecordHeader {
            capacity,
            status: RecordStatus::Live {
                length: payload.len(),
            },
        };
        self.write_all_at(offset, &header.encode(), "failed to update record header")?;

        adjust_live_payload(self.counters_mut(), old_length, payload.len());
        Ok(())
    }

    /// Replaces a live record's header with a redirect to `to`. The record
    /// leaves the live bucket for the relocated one.
    pub fn mark_relocated(
        &mut self,
        id: RecordId,
        capacity: usize,
        old_length: usize,
        to: RecordId,
    ) -> StorageResult<()> {
        let header = RecordHeader {
            capacity,
            status: RecordStatus::Redirected { to },
        };
        self.write_all_at(
            id_to_offset(id),
            &header.encode(),
            "failed to write redirect marker",
        )?;

        let counters = self.counters_mut();
        counters.records_relocated += 1;
        counters.live_payload_bytes = counters.live_payload_bytes.saturating_sub(old_length as u64);
        counters.live_capacity_bytes = counters.live_capacity_bytes.saturating_sub(capacity as u64);
        Ok(())
    }

    /// Marks a live record deleted.
    pub fn mark_deleted_live(
        &mut self,
        id: RecordId,
        capacity: usize,
        old_length: usize,
    ) -> StorageResult<()> {
        self.write_deleted_header(id, capacity)?;

        let counters = self.counters_mut();
        counters.records_deleted += 1;
        counters.live_payload_bytes = counters.live_payload_bytes.saturating_sub(old_length as u64);
        counters.live_capacity_bytes = counters.live_capacity_bytes.saturating_sub(capacity as u64);
        Ok(())
    }

    /// Marks a redirect marker deleted: the extent moves from the
    /// relocated bucket to the deleted one; byte totals were already
    /// subtracted when the record relocated.
    pub fn mark_deleted_redirect(&mut self, id: RecordId, capacity: usize) -> StorageResult<()> {
        self.write_deleted_header(id, capacity)?;

        let counters = self.counters_mut();
        counters.records_relocated = counters.records_relocated.saturating_sub(1);
        counters.records_deleted += 1;
        Ok(())
    }

    fn write_deleted_header(&mut self, id: RecordId, capacity: usize) -> StorageResult<()> {
        let header = RecordHeader {
            capacity,
            status: RecordStatus::Deleted,
        };
        self.write_all_at(
            id_to_offset(id),
            &header.encode(),
            "failed to write deleted record header",
        )
    }

    pub fn set_status(&mut self, status: FileStatus) {
        self.header.file_status = status;
    }

    /// Persists the cached header (counters, versions, status, checksum).
    pub fn write_header_to_disk(&mut self) -> StorageResult<()> {
        let bytes = self.header.encode();
        self.write_all_at(0, &bytes, "failed to write storage header")
    }

    /// Flushes file contents and metadata to durable media.
    pub fn sync(&mut self) -> StorageResult<()> {
        self.file
            .sync_all()
            .map_err(|e| StorageError::io("fsync of storage file failed", e))
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8], what: &str) -> StorageResult<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| StorageError::io(format!("{}: seek to {}", what, offset), e))?;
        self.file.read_exact(buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                StorageError::corruption_at_offset(
                    offset,
                    format!("{}: file truncated mid-extent", what),
                )
            } else {
                StorageError::io(format!("{}: read at {}", what, offset), e)
            }
        })
    }

    fn write_all_at(&mut self, offset: u64, buf: &[u8], what: &str) -> StorageResult<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| StorageError::io(format!("{}: seek to {}", what, offset), e))?;
        self.file
            .write_all(buf)
            .map_err(|e| StorageError::io(format!("{}: write at {}", what, offset), e))?;
        self.dirty = true;
        Ok(())
    }
}

fn align_up_to_bucket(offset: u64) -> u64 {
    let bucket = OFFSET_BUCKET as u64;
    if offset % bucket == 0 {
        offset
    } else {
        (offset / bucket + 1) * bucket
    }
}

fn adjust_live_payload(counters: &mut RecordCounters, old: usize, new: usize) {
    if new >= old {
        counters.live_payload_bytes += (new - old) as u64;
    } else {
        counters.live_payload_bytes = counters.live_payload_bytes.saturating_sub((old - new) as u64);
    }
}
