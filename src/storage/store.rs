//! Blob store facade
//!
//! Composes the storage file, the redirect resolver and the allocation
//! strategy into the public contract: read, write, delete and scan records,
//! manage version metadata and the closed-properly flag.
//!
//! # Lifecycle
//!
//! `Closed -> Open -> Closed`. `open` reads and validates the header and
//! stamps the file as open; `close` flushes everything and stamps it safely
//! closed. Every record operation on a closed store fails with
//! `BLOB_ILLEGAL_STATE`. Dropping a store without closing it leaves the
//! open stamp behind, so the next open reports an unclean shutdown.
//!
//! # Concurrency
//!
//! Exclusive access: every operation takes `&mut self`, so the borrow
//! checker serializes callers. Share a store across threads by wrapping it
//! in a lock. The engine spawns no threads and performs synchronous
//! blocking I/O only.
//!
//! # Crash ordering
//!
//! A relocation writes the new extent completely before the old extent is
//! turned into a redirect marker (or deleted), so a crash in between leaves
//! either the old record or both - never a marker pointing at garbage.

use std::path::Path;

use crate::alloc::SpaceAllocationStrategy;
use crate::observability::Logger;

use super::errors::{StorageError, StorageResult};
use super::file::StorageFile;
use super::header::{FileStatus, RECORDS_START_OFFSET};
use super::record::{
    offset_to_id, round_capacity_up_to_bucket, RecordId, RecordStatus, MAX_CAPACITY, MAX_PAYLOAD,
    RECORD_HEADER_SIZE,
};
use super::redirect::{resolve_chain, ResolvedRecord};
use super::stats::StorageStats;

/// What the writer callback did with the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The buffer holds the new payload.
    Written,
    /// Nothing changed; the record is left untouched.
    Unchanged,
}

/// Mutable payload buffer handed to writer callbacks.
///
/// Starts out holding the record's current payload (empty for a new
/// record). The writer edits it freely; content longer than `capacity`
/// makes the store relocate the record to a larger extent.
#[derive(Debug)]
pub struct WriteBuf {
    data: Vec<u8>,
    capacity: usize,
}

impl WriteBuf {
    fn for_new(capacity: usize) -> WriteBuf {
        WriteBuf {
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    fn for_existing(payload: Vec<u8>, capacity: usize) -> WriteBuf {
        WriteBuf {
            data: payload,
            capacity,
        }
    }

    /// Current payload length.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Capacity of the current extent (or the pre-sized buffer for a new
    /// record). Content beyond it triggers relocation.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the content no longer fits the current extent.
    pub fn grows_beyond_capacity(&self) -> bool {
        self.data.len() > self.capacity
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Shortens the payload to `len` bytes; no-op if already shorter.
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }

    /// Appends bytes to the payload.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Replaces the whole payload.
    pub fn replace(&mut self, bytes: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(bytes);
    }
}

/// One record extent as seen by a `for_each` scan.
#[derive(Debug)]
pub struct RecordView<'a> {
    pub id: RecordId,
    /// Payload bytes reserved by the extent
    pub capacity: usize,
    /// Live, deleted, or redirected elsewhere
    pub status: RecordStatus,
    /// Valid payload bytes; empty unless the record is live
    pub payload: &'a [u8],
}

/// Single-file blob store addressed by offset-derived record ids.
#[derive(Debug)]
pub struct BlobStore {
    file: StorageFile,
    strategy: Box<dyn SpaceAllocationStrategy>,
    closed: bool,
}

impl BlobStore {
    /// Opens or creates the storage file at `path`.
    ///
    /// The allocation strategy is supplied fresh on every open; it is never
    /// persisted. A file written by a different engine revision is rejected
    /// with `BLOB_VERSION_MISMATCH`.
    pub fn open(
        path: &Path,
        strategy: Box<dyn SpaceAllocationStrategy>,
    ) -> StorageResult<BlobStore> {
        let file = StorageFile::open(path)?;

        let path_str = file.path().display().to_string();
        let version_str = file.storage_version().to_string();
        let was_clean = file.was_closed_properly();
        Logger::info(
            "STORAGE_OPENED",
            &[
                ("path", &path_str),
                ("storage_version", &version_str),
                ("was_closed_properly", if was_clean { "true" } else { "false" }),
            ],
        );
        if !was_clean {
            Logger::warn("STORAGE_UNCLEAN_OPEN", &[("path", &path_str)]);
        }

        Ok(BlobStore {
            file,
            strategy,
            closed: false,
        })
    }

    /// Engine-owned format version of the open file. Read-only to callers.
    pub fn storage_version(&self) -> u32 {
        self.file.storage_version()
    }

    /// Caller-owned data format version, opaque to the engine.
    pub fn data_format_version(&self) -> u32 {
        self.file.data_format_version()
    }

    /// Sets the caller-owned data format version.
    pub fn set_data_format_version(&mut self, version: u32) -> StorageResult<()> {
        self.ensure_open()?;
        self.file.set_data_format_version(version)
    }

    /// Whether the file recorded a clean shutdown when it was opened.
    ///
    /// `false` is advisory, not an error: the file may be inconsistent and
    /// the layer above should consider rebuilding its derived data.
    pub fn was_closed_properly(&self) -> bool {
        self.file.was_closed_properly()
    }

    /// Largest payload a single record can hold.
    pub fn max_payload_supported(&self) -> usize {
        MAX_PAYLOAD
    }

    /// Logical storage size in bytes.
    pub fn size_in_bytes(&self) -> u64 {
        self.file.size_in_bytes()
    }

    /// Whether mutations exist that have not been flushed by `force`/`close`.
    pub fn is_dirty(&self) -> bool {
        self.file.is_dirty()
    }

    /// Whether `id` currently resolves (possibly through redirects) to a
    /// live record.
    pub fn has_record(&mut self, id: RecordId) -> StorageResult<bool> {
        self.has_record_inner(id, None)
    }

    /// Like `has_record`, additionally reporting where the redirect chain
    /// ended, so the caller can replace a stale stored id and skip the
    /// chain next time.
    pub fn has_record_resolved(
        &mut self,
        id: RecordId,
        resolved_id: &mut RecordId,
    ) -> StorageResult<bool> {
        self.has_record_inner(id, Some(resolved_id))
    }

    fn has_record_inner(
        &mut self,
        id: RecordId,
        resolved_out: Option<&mut RecordId>,
    ) -> StorageResult<bool> {
        self.ensure_open()?;
        match resolve_chain(&mut self.file, id)? {
            ResolvedRecord::Unallocated => Ok(false),
            ResolvedRecord::Deleted { id: end } => {
                if let Some(out) = resolved_out {
                    *out = end;
                }
                Ok(false)
            }
            ResolvedRecord::Live { id: end, .. } => {
                if let Some(out) = resolved_out {
                    *out = end;
                }
                Ok(true)
            }
        }
    }

    /// Reads the record behind `id`, following redirects, and hands its
    /// payload to `reader`. Whatever the reader returns is passed through.
    ///
    /// Does not mutate record state. Reading a deleted or never-allocated
    /// id fails with `BLOB_ILLEGAL_STATE`.
    pub fn read_record<T, R>(&mut self, id: RecordId, reader: R) -> StorageResult<T>
    where
        R: FnOnce(&[u8]) -> T,
    {
        self.read_record_inner(id, None, reader)
    }

    /// Like `read_record`, additionally reporting the id the redirect chain
    /// resolved to.
    pub fn read_record_resolved<T, R>(
        &mut self,
        id: RecordId,
        resolved_id: &mut RecordId,
        reader: R,
    ) -> StorageResult<T>
    where
        R: FnOnce(&[u8]) -> T,
    {
        self.read_record_inner(id, Some(resolved_id), reader)
    }

    fn read_record_inner<T, R>(
        &mut self,
        id: RecordId,
        resolved_out: Option<&mut RecordId>,
        reader: R,
    ) -> StorageResult<T>
    where
        R: FnOnce(&[u8]) -> T,
    {
        self.ensure_open()?;
        match resolve_chain(&mut self.file, id)? {
            ResolvedRecord::Unallocated => Err(StorageError::illegal_state_for_record(
                id.get(),
                "record id is not allocated",
            )),
            ResolvedRecord::Deleted { id: end } => {
                if let Some(out) = resolved_out {
                    *out = end;
                }
                Err(StorageError::illegal_state_for_record(
                    end.get(),
                    "record is deleted",
                ))
            }
            ResolvedRecord::Live { id: end, length, .. } => {
                if let Some(out) = resolved_out {
                    *out = end;
                }
                let payload = self.file.payload_slice(end, length)?;
                Ok(reader(payload))
            }
        }
    }

    /// Writes a record through the `writer` callback.
    ///
    /// With `record_id = None` a new record is allocated; the buffer starts
    /// empty, pre-sized to `max(default_capacity, size_hint)`. With an
    /// existing id, redirects are resolved first and the buffer starts with
    /// the current payload.
    ///
    /// If the new payload fits the current extent the record is updated in
    /// place and the same id returned. Otherwise the record relocates to a
    /// fresh extent sized by the allocation strategy, and the old extent
    /// becomes a redirect marker when `keep_redirect_on_relocate` is set,
    /// or is dropped as deleted when it is not. Either way the returned id
    /// is the record's current one, which the caller must store.
    pub fn write_to_record<W>(
        &mut self,
        record_id: Option<RecordId>,
        size_hint: usize,
        keep_redirect_on_relocate: bool,
        writer: W,
    ) -> StorageResult<RecordId>
    where
        W: FnOnce(&mut WriteBuf) -> StorageResult<WriteOutcome>,
    {
        self.ensure_open()?;
        match record_id {
            None => self.write_new_record(size_hint, writer),
            Some(id) => self.write_existing_record(id, keep_redirect_on_relocate, writer),
        }
    }

    fn write_new_record<W>(&mut self, size_hint: usize, writer: W) -> StorageResult<RecordId>
    where
        W: FnOnce(&mut WriteBuf) -> StorageResult<WriteOutcome>,
    {
        let initial = self.strategy.default_capacity().max(size_hint);
        let mut buf = WriteBuf::for_new(initial);
        match writer(&mut buf)? {
            WriteOutcome::Unchanged => Err(StorageError::illegal_state(
                "writer returned Unchanged for a new record",
            )),
            WriteOutcome::Written => self.allocate_from_buf(&buf),
        }
    }

    fn write_existing_record<W>(
        &mut self,
        id: RecordId,
        keep_redirect_on_relocate: bool,
        writer: W,
    ) -> StorageResult<RecordId>
    where
        W: FnOnce(&mut WriteBuf) -> StorageResult<WriteOutcome>,
    {
        let (actual, capacity, length) = match resolve_chain(&mut self.file, id)? {
            ResolvedRecord::Unallocated => {
                return Err(StorageError::illegal_state_for_record(
                    id.get(),
                    "record id is not allocated",
                ))
            }
            ResolvedRecord::Deleted { id: end } => {
                return Err(StorageError::illegal_state_for_record(
                    end.get(),
                    "cannot write to a deleted record",
                ))
            }
            ResolvedRecord::Live {
                id,
                capacity,
                length,
            } => (id, capacity, length),
        };

        let payload = self.file.payload_slice(actual, length)?.to_vec();
        let mut buf = WriteBuf::for_existing(payload, capacity);

        match writer(&mut buf)? {
            WriteOutcome::Unchanged => Ok(actual),
            WriteOutcome::Written => {
                let new_length = buf.len();
                if new_length <= capacity {
                    self.check_payload_length(new_length)?;
                    self.file
                        .update_live_payload(actual, capacity, length, buf.as_slice())?;
                    Ok(actual)
                } else {
                    let new_id = self.allocate_from_buf(&buf)?;
                    if keep_redirect_on_relocate {
                        self.file.mark_relocated(actual, capacity, length, new_id)?;
                    } else {
                        self.file.mark_deleted_live(actual, capacity, length)?;
                    }

                    let from = actual.to_string();
                    let to = new_id.to_string();
                    Logger::trace(
                        "RECORD_RELOCATED",
                        &[
                            ("from", &from),
                            ("to", &to),
                            ("redirect", if keep_redirect_on_relocate { "kept" } else { "dropped" }),
                        ],
                    );
                    Ok(new_id)
                }
            }
        }
    }

    /// Allocates a fresh extent for the buffer's payload, capacity decided
    /// by the allocation strategy and rounded up to the alignment bucket.
    fn allocate_from_buf(&mut self, buf: &WriteBuf) -> StorageResult<RecordId> {
        let length = buf.len();
        self.check_payload_length(length)?;

        let declared_capacity = buf.capacity().max(length);
        let requested = self
            .strategy
            .capacity(length, declared_capacity)
            .map_err(|e| {
                StorageError::illegal_state(format!(
                    "allocation strategy {:?} rejected the write: {}",
                    self.strategy, e
                ))
            })?;
        if requested < length {
            // Strategy clamped below the payload (its configured maximum is
            // smaller than the data): the record cannot be stored.
            return Err(StorageError::too_large(length, requested));
        }

        let capacity = round_capacity_up_to_bucket(requested);
        if capacity > MAX_CAPACITY {
            return Err(StorageError::too_large(length, MAX_CAPACITY));
        }

        self.file.allocate_extent(buf.as_slice(), capacity)
    }

    fn check_payload_length(&self, length: usize) -> StorageResult<()> {
        if length == 0 {
            return Err(StorageError::illegal_state(
                "record payload must not be empty",
            ));
        }
        if length > MAX_PAYLOAD {
            return Err(StorageError::too_large(length, MAX_PAYLOAD));
        }
        Ok(())
    }

    /// Deletes the record at exactly `id`, ignoring redirects.
    ///
    /// Deliberately asymmetric with `read_record`/`write_to_record`: a
    /// client first migrates every holder of a stale id to the new one,
    /// then reclaims the stale extent - which must not touch the live,
    /// relocated data. Deleting an already-deleted record fails with
    /// `BLOB_ILLEGAL_STATE`.
    pub fn delete_record(&mut self, id: RecordId) -> StorageResult<()> {
        self.ensure_open()?;
        if !self.file.is_id_allocated(id) {
            return Err(StorageError::illegal_state_for_record(
                id.get(),
                "record id is not allocated",
            ));
        }

        let header = self.file.read_record_header(id)?;
        match header.status {
            RecordStatus::Deleted => Err(StorageError::illegal_state_for_record(
                id.get(),
                "record is already deleted",
            )),
            RecordStatus::Live { length } => {
                self.file.mark_deleted_live(id, header.capacity, length)
            }
            RecordStatus::Redirected { .. } => {
                self.file.mark_deleted_redirect(id, header.capacity)
            }
        }
    }

    /// Scans every extent - live, deleted or redirected - in ascending
    /// offset order and hands each one to `visitor`. The scan stops early
    /// when the visitor returns `false`.
    ///
    /// Returns how many records the visitor saw. Consumers may rely on the
    /// ascending order; compaction and statistics do.
    pub fn for_each<V>(&mut self, mut visitor: V) -> StorageResult<usize>
    where
        V: FnMut(&RecordView<'_>) -> bool,
    {
        self.ensure_open()?;

        let end = self.file.size_in_bytes();
        let mut offset = RECORDS_START_OFFSET;
        let mut visited: usize = 0;

        while offset < end {
            let id = offset_to_id(offset)?;
            let header = self.file.read_record_header(id)?;

            let payload_len = match header.status {
                RecordStatus::Live { length } => length,
                RecordStatus::Deleted | RecordStatus::Redirected { .. } => 0,
            };
            let payload = self.file.payload_slice(id, payload_len)?;

            let view = RecordView {
                id,
                capacity: header.capacity,
                status: header.status,
                payload,
            };
            visited += 1;
            if !visitor(&view) {
                return Ok(visited);
            }

            offset += (RECORD_HEADER_SIZE + header.capacity) as u64;
        }

        Ok(visited)
    }

    /// Statistics snapshot from the running counters. Cheap; for a scan-based
    /// recomputation see `storage::stats::collect`.
    pub fn statistics(&self) -> StorageResult<StorageStats> {
        self.ensure_open()?;
        Ok(StorageStats::from_counters(
            self.file.counters(),
            self.file.size_in_bytes(),
        ))
    }

    /// Flushes all mutations and the header to durable media without
    /// closing. The closed-properly stamp is NOT written; only `close`
    /// certifies a clean shutdown.
    pub fn force(&mut self) -> StorageResult<()> {
        self.ensure_open()?;
        self.file.write_header_to_disk()?;
        self.file.sync()?;
        self.file.clear_dirty();
        Ok(())
    }

    /// Flushes everything, stamps the file safely closed and transitions to
    /// `Closed`. Idempotent; every other operation afterwards fails with
    /// `BLOB_ILLEGAL_STATE`.
    pub fn close(&mut self) -> StorageResult<()> {
        if self.closed {
            return Ok(());
        }

        self.file.set_status(FileStatus::SafelyClosed);
        self.file.write_header_to_disk()?;
        self.file.sync()?;
        self.file.clear_dirty();
        self.closed = true;

        let path_str = self.file.path().display().to_string();
        Logger::info("STORAGE_CLOSED", &[("path", &path_str)]);
        Ok(())
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed {
            Err(StorageError::illegal_state("storage is closed"))
        } else {
            Ok(())
        }
    }
}
