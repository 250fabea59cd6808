//! The journal writer: buffered appends, straddled reads, snapshots, and
//! replay.
//!
//! A [`ChunkJournal`] owns a single pre-allocated, zero-filled file and an
//! in-memory write buffer. Appended records accumulate in the buffer and are
//! written to the file in batches; readers see the tail transparently whether
//! it lives in the buffer, on disk, or straddles the boundary. One
//! readers-writer lock guards all of it: mutating operations and snapshots
//! take it exclusively, queries and reads take it shared and hold it for the
//! duration so a flush cannot shift the buffer boundary mid-read.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::chunk::{Address, CompressedChunk};
use crate::config::JournalConfig;
use crate::error::{JournalError, JournalResult};
use crate::fs;
use crate::record::{
    chunk_record_size, process_journal_records, read_journal_record, root_hash_record_size,
    write_chunk_record, write_root_hash_record, RecordKind, RECORD_CHECKSUM_BYTES,
};

/// Location of an indexed record within the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLookup {
    /// Offset of the record's first byte in the journal.
    pub journal_off: u64,
    /// Total encoded record length.
    pub record_len: u32,
    /// Offset of the payload within the record.
    pub payload_off: u32,
}

impl RecordLookup {
    fn range(&self) -> RecordRange {
        RecordRange {
            offset: self.journal_off + u64::from(self.payload_off),
            length: self.record_len - self.payload_off - RECORD_CHECKSUM_BYTES as u32,
        }
    }
}

/// Absolute location of a record payload, handed to the surrounding engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordRange {
    /// Journal offset of the payload's first byte.
    pub offset: u64,
    /// Payload length in bytes, checksum excluded.
    pub length: u32,
}

/// Returns whether a journal file exists at `path`.
///
/// Fails with [`JournalError::IsDirectory`] when the path names a directory.
pub fn journal_file_exists(path: &Path) -> JournalResult<bool> {
    let path = fs::absolute_path(path)?;
    match std::fs::metadata(&path) {
        Ok(meta) if meta.is_dir() => Err(JournalError::IsDirectory(path)),
        Ok(_) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

#[derive(Debug)]
struct JournalState {
    /// Open file handle; `None` once the journal is closed.
    file: Option<File>,
    /// Not-yet-flushed record bytes. Allocated once; never reallocated.
    buf: Vec<u8>,
    /// Configured buffer capacity. `Vec::capacity` may round up, so the
    /// oversize check uses this instead.
    capacity: usize,
    /// File offset at which `buf` begins; bytes already written to the file.
    off: u64,
    lookups: HashMap<Address, RecordLookup>,
    uncompressed: u64,
}

impl JournalState {
    fn new(file: File, capacity: usize) -> Self {
        Self {
            file: Some(file),
            buf: Vec::with_capacity(capacity),
            capacity,
            off: 0,
            lookups: HashMap::new(),
            uncompressed: 0,
        }
    }

    fn file(&self) -> JournalResult<&File> {
        self.file.as_ref().ok_or(JournalError::Closed)
    }

    /// Logical end of the journal; the offset the next record will begin.
    #[inline]
    fn logical_end(&self) -> u64 {
        self.off + self.buf.len() as u64
    }

    /// Reserves `n` contiguous bytes at the buffer tail, flushing first when
    /// the remaining room is insufficient.
    fn reserve(&mut self, n: usize) -> JournalResult<&mut [u8]> {
        if n > self.capacity {
            return Err(JournalError::OversizeRecord {
                length: n,
                capacity: self.capacity,
            });
        }
        if n > self.capacity - self.buf.len() {
            self.flush()?;
        }
        let start = self.buf.len();
        self.buf.resize(start + n, 0);
        Ok(&mut self.buf[start..start + n])
    }

    /// Writes the buffer to the file at `off` and empties it without
    /// shrinking capacity. Does not fsync.
    fn flush(&mut self) -> JournalResult<()> {
        let file = self.file.as_ref().ok_or(JournalError::Closed)?;
        fs::write_all_at(file, &self.buf, self.off)?;
        self.off += self.buf.len() as u64;
        self.buf.clear();
        Ok(())
    }

    /// Serves a read at an arbitrary offset, spanning file and buffer.
    ///
    /// Returns the number of bytes delivered; a read extending past the
    /// logical end copies what exists and returns a short count.
    fn read_at(&self, dst: &mut [u8], offset: u64) -> JournalResult<usize> {
        let mut delivered = 0usize;
        let (buf_dst, buf_start) = if offset < self.off {
            // Some or all of the read lies in the file.
            let file = self.file()?;
            let file_part = ((self.off - offset) as usize).min(dst.len());
            fs::read_exact_at(file, &mut dst[..file_part], offset)?;
            delivered = file_part;
            (&mut dst[file_part..], 0usize)
        } else {
            (&mut dst[..], (offset - self.off) as usize)
        };

        if !buf_dst.is_empty() && buf_start < self.buf.len() {
            let n = buf_dst.len().min(self.buf.len() - buf_start);
            buf_dst[..n].copy_from_slice(&self.buf[buf_start..buf_start + n]);
            delivered += n;
        }
        Ok(delivered)
    }
}

/// Append-only journal of content-addressed chunk records and root-hash
/// commit markers.
///
/// A single writer appends; any number of threads may concurrently query and
/// read through the same instance. See the crate docs for the record format
/// and recovery model.
///
/// # Lifecycle
///
/// Construct with [`ChunkJournal::create`] for a new journal or
/// [`ChunkJournal::open`] for an existing one. After `open`, call
/// [`ChunkJournal::process_journal`] exactly once to rebuild the in-memory
/// index and recover the last root hash before issuing any other operation.
/// Finish with [`ChunkJournal::close`]; every operation afterwards fails with
/// [`JournalError::Closed`].
#[derive(Debug)]
pub struct ChunkJournal {
    path: PathBuf,
    state: RwLock<JournalState>,
}

impl ChunkJournal {
    /// Creates a new journal at `path`.
    ///
    /// The path is resolved to absolute, the file is created read-write and
    /// zero-filled to the configured size in fixed batches, fsynced along
    /// with its parent directory, and rewound to offset zero. Fails with
    /// [`JournalError::AlreadyExists`] when the path exists and
    /// [`JournalError::IsDirectory`] when it names a directory.
    pub fn create(path: &Path, config: JournalConfig) -> JournalResult<Self> {
        let config = config.normalized();
        let path = fs::absolute_path(path)?;
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_dir() => return Err(JournalError::IsDirectory(path)),
            Ok(_) => return Err(JournalError::AlreadyExists(path)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        let file = fs::create_fixed_size_file(&path, config.journal_file_bytes)?;
        fs::fsync_dir(&path)?;
        info!(
            path = %path.display(),
            file_bytes = config.journal_file_bytes,
            "chunk journal created"
        );
        Ok(Self {
            state: RwLock::new(JournalState::new(file, config.write_buffer_bytes as usize)),
            path,
        })
    }

    /// Opens an existing journal at `path`.
    ///
    /// Returns `Ok(None)` when no file exists, letting the caller fall back
    /// to [`ChunkJournal::create`]; absence is not an error. The returned
    /// journal has an empty index: call
    /// [`ChunkJournal::process_journal`] exactly once before any other
    /// operation.
    pub fn open(path: &Path, config: JournalConfig) -> JournalResult<Option<Self>> {
        let config = config.normalized();
        let path = fs::absolute_path(path)?;
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_dir() => return Err(JournalError::IsDirectory(path)),
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        }

        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        debug!(path = %path.display(), "chunk journal opened");
        Ok(Some(Self {
            state: RwLock::new(JournalState::new(file, config.write_buffer_bytes as usize)),
            path,
        }))
    }

    /// Canonical absolute path of the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replays the journal, rebuilding the lookup index and recovering the
    /// last root hash.
    ///
    /// Forward-scans records from offset zero. Chunk records populate the
    /// index and accumulate the uncompressed-size statistic; each root-hash
    /// record overwrites the last-root candidate. The scan stops at the
    /// first invalid framing, which becomes the append position. Returns the
    /// last root hash, or [`Address::ZERO`] when none was ever written.
    pub fn process_journal(&self) -> JournalResult<Address> {
        let mut state = self.state.write();
        let JournalState {
            file,
            lookups,
            uncompressed,
            ..
        } = &mut *state;
        let file = file.as_mut().ok_or(JournalError::Closed)?;

        let mut last_root = Address::ZERO;
        let end = process_journal_records(file, |offset, rec| {
            match rec.kind {
                RecordKind::Chunk => {
                    lookups.insert(
                        rec.address,
                        RecordLookup {
                            journal_off: offset,
                            record_len: rec.length,
                            payload_off: rec.payload_offset(),
                        },
                    );
                    *uncompressed += rec.uncompressed_payload_size();
                }
                RecordKind::RootHash => last_root = rec.address,
            }
            Ok(())
        })?;
        state.off = end;

        info!(
            path = %self.path.display(),
            records = state.lookups.len(),
            end_offset = end,
            last_root = %last_root,
            "journal replay complete"
        );
        Ok(last_root)
    }

    /// Appends a chunk record and indexes it under the chunk's address.
    ///
    /// The record is buffered; it reaches disk on the next flush and becomes
    /// durable on the next [`ChunkJournal::write_root_hash`]. Fails with
    /// [`JournalError::OversizeRecord`] when the encoded record exceeds the
    /// buffer capacity.
    pub fn write_chunk(&self, cc: &CompressedChunk) -> JournalResult<()> {
        let mut state = self.state.write();
        state.file()?;

        let (record_len, payload_off) = chunk_record_size(cc);
        let lookup = RecordLookup {
            journal_off: state.logical_end(),
            record_len,
            payload_off,
        };
        let dst = state.reserve(record_len as usize)?;
        write_chunk_record(dst, cc);
        state.uncompressed += cc.uncompressed_len();
        state.lookups.insert(*cc.address(), lookup);
        Ok(())
    }

    /// Appends a root-hash record, then flushes and fsyncs.
    ///
    /// This is the journal's sole durability barrier: a successful return
    /// means every previously appended chunk record and the root-hash record
    /// itself are on disk.
    pub fn write_root_hash(&self, root: &Address) -> JournalResult<()> {
        let mut state = self.state.write();
        state.file()?;

        let dst = state.reserve(root_hash_record_size() as usize)?;
        write_root_hash_record(dst, root);
        state.flush()?;
        state.file()?.sync_data()?;
        debug!(root = %root, "root hash committed");
        Ok(())
    }

    /// Reads into `buf` starting at journal offset `offset`, transparently
    /// spanning the flushed file and the in-memory buffer.
    ///
    /// Returns the number of bytes delivered. A read extending past the
    /// logical end returns a short count; it is not an error.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> JournalResult<usize> {
        let state = self.state.read();
        state.file()?;
        state.read_at(buf, offset)
    }

    /// Produces a consistent, independently-lifetimed reader over the
    /// journal prefix `[0, current_size)`.
    ///
    /// The buffer is flushed so every byte of the snapshot exists on disk,
    /// then a second descriptor is opened on the journal path. Because the
    /// file never shrinks and appends only mutate bytes past the snapshot's
    /// upper bound, the writer may continue appending without disturbing the
    /// snapshot consumer.
    pub fn snapshot(&self) -> JournalResult<(JournalSnapshot, u64)> {
        let mut state = self.state.write();
        state.file()?;
        state.flush()?;

        let file = File::open(&self.path)?;
        let len = state.off;
        Ok((
            JournalSnapshot {
                inner: file.take(len),
                len,
            },
            len,
        ))
    }

    /// Logical size of the journal: flushed bytes plus buffered bytes.
    pub fn current_size(&self) -> JournalResult<u64> {
        let state = self.state.read();
        state.file()?;
        Ok(state.logical_end())
    }

    /// Returns whether a chunk record for `addr` is indexed.
    pub fn has(&self, addr: &Address) -> JournalResult<bool> {
        let state = self.state.read();
        state.file()?;
        Ok(state.lookups.contains_key(addr))
    }

    /// Returns the payload location for `addr`, if indexed.
    pub fn get_range(&self, addr: &Address) -> JournalResult<Option<RecordRange>> {
        let state = self.state.read();
        state.file()?;
        Ok(state.lookups.get(addr).map(RecordLookup::range))
    }

    /// Materializes the compressed chunk stored under `addr`.
    ///
    /// Re-reads the full record (straddling file and buffer as needed),
    /// decodes and checksums it, and verifies the stored address matches the
    /// requested one, failing with [`JournalError::AddressMismatch`] when it
    /// does not. Returns `Ok(None)` when the address is not indexed.
    pub fn get_compressed(&self, addr: &Address) -> JournalResult<Option<CompressedChunk>> {
        let state = self.state.read();
        state.file()?;
        let Some(lookup) = state.lookups.get(addr).copied() else {
            return Ok(None);
        };

        let mut buf = vec![0u8; lookup.record_len as usize];
        let delivered = state.read_at(&mut buf, lookup.journal_off)?;
        if delivered != buf.len() {
            return Err(JournalError::corrupt(format!(
                "indexed record at offset {} extends past journal end",
                lookup.journal_off
            )));
        }

        let rec = read_journal_record(&buf)?;
        if rec.address != *addr {
            return Err(JournalError::AddressMismatch {
                requested: *addr,
                found: rec.address,
            });
        }
        Ok(Some(CompressedChunk::new(rec.address, rec.payload)))
    }

    /// Number of chunk records indexed.
    pub fn record_count(&self) -> JournalResult<u32> {
        let state = self.state.read();
        state.file()?;
        Ok(state.lookups.len() as u32)
    }

    /// Running sum of the uncompressed sizes of indexed chunk payloads.
    pub fn uncompressed_size(&self) -> JournalResult<u64> {
        let state = self.state.read();
        state.file()?;
        Ok(state.uncompressed)
    }

    /// Flushes, fsyncs, and releases the journal file.
    ///
    /// All three steps are attempted regardless of individual failures; the
    /// last error observed wins. Every subsequent operation, including a
    /// second `close`, fails with [`JournalError::Closed`].
    pub fn close(&self) -> JournalResult<()> {
        let mut state = self.state.write();
        if state.file.is_none() {
            return Err(JournalError::Closed);
        }

        let mut result = Ok(());
        if let Err(err) = state.flush() {
            result = Err(err);
        }
        if let Some(file) = state.file.take() {
            if let Err(err) = file.sync_data() {
                result = Err(err.into());
            }
        }
        debug!(path = %self.path.display(), "chunk journal closed");
        result
    }
}

impl Drop for ChunkJournal {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(file) = state.file.take() {
            let result = fs::write_all_at(&file, &state.buf, state.off)
                .and_then(|_| file.sync_data());
            if let Err(err) = result {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "journal dropped without close; final flush failed"
                );
            }
        }
    }
}

/// Length-limited reader over a consistent journal prefix.
///
/// Holds its own file descriptor, so its lifetime is independent of the
/// writer that produced it: the writer may keep appending, or close, without
/// affecting this reader.
pub struct JournalSnapshot {
    inner: io::Take<File>,
    len: u64,
}

impl JournalSnapshot {
    /// Total length of the snapshot in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns true when the snapshot covers an empty journal.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Read for JournalSnapshot {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}
