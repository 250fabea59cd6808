//! On-disk record framing for the chunk journal.
//!
//! Every record is self-delimiting and self-checksummed:
//!
//! ```text
//! ┌──────────┬──────┬──────────┬─────────┬──────────┐
//! │ length   │ kind │ address  │ payload │ checksum │
//! │ u32 LE   │ u8   │ 20 bytes │ N bytes │ u32 LE   │
//! └──────────┴──────┴──────────┴─────────┴──────────┘
//! ```
//!
//! `length` counts the whole record including itself, so a replayer can
//! advance from the length prefix alone. The checksum covers every byte
//! before it. Because the journal file is zero-filled at creation, a scan
//! that runs into the unwritten tail sees a zero length field, which can
//! never validate; invalid framing therefore doubles as the end-of-data
//! marker.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};

use byteorder::{ByteOrder, LittleEndian};
use crc64fast_nvme::Digest;
use tracing::{debug, warn};

use crate::chunk::{decode_uvarint, Address, CompressedChunk, ADDRESS_LEN};
use crate::error::{JournalError, JournalResult};

/// Size of the record length prefix.
const RECORD_LEN_BYTES: usize = 4;
/// Size of the record kind tag.
const RECORD_KIND_BYTES: usize = 1;
/// Size of the trailing checksum.
pub(crate) const RECORD_CHECKSUM_BYTES: usize = 4;

/// Offset of the payload within a record.
pub const RECORD_PAYLOAD_OFFSET: usize = RECORD_LEN_BYTES + RECORD_KIND_BYTES + ADDRESS_LEN;

/// Smallest valid record: empty payload (a root-hash record).
pub const MIN_RECORD_LEN: usize = RECORD_PAYLOAD_OFFSET + RECORD_CHECKSUM_BYTES;

/// Kind tag of a journal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    /// A content-addressed chunk with a compressed payload.
    Chunk = 1,
    /// A root-hash commit marker; the address field carries the root, the
    /// payload is empty.
    RootHash = 2,
}

impl TryFrom<u8> for RecordKind {
    type Error = JournalError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => RecordKind::Chunk,
            2 => RecordKind::RootHash,
            _ => return Err(JournalError::UnknownRecordKind(value)),
        })
    }
}

/// Folds a 64-bit CRC into the 32-bit field stored on disk.
#[inline]
fn fold_crc64(value: u64) -> u32 {
    let upper = (value >> 32) as u32;
    let lower = value as u32;
    upper ^ lower
}

/// Computes the record checksum over `bytes`.
pub(crate) fn record_checksum(bytes: &[u8]) -> u32 {
    let mut digest = Digest::new();
    digest.write(bytes);
    fold_crc64(digest.sum64())
}

/// A decoded journal record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalRecord {
    /// Total encoded length, length prefix and checksum included.
    pub length: u32,
    /// Record kind.
    pub kind: RecordKind,
    /// Chunk address, or the root hash for [`RecordKind::RootHash`].
    pub address: Address,
    /// Payload bytes (empty for root-hash records).
    pub payload: Vec<u8>,
}

impl JournalRecord {
    /// Offset of the payload within the encoded record.
    #[inline]
    pub fn payload_offset(&self) -> u32 {
        RECORD_PAYLOAD_OFFSET as u32
    }

    /// Uncompressed size of the payload, read from its varint prefix.
    pub(crate) fn uncompressed_payload_size(&self) -> u64 {
        decode_uvarint(&self.payload).unwrap_or(0)
    }
}

/// Returns the encoded size of a chunk record and the payload offset within it.
pub fn chunk_record_size(cc: &CompressedChunk) -> (u32, u32) {
    let total = MIN_RECORD_LEN + cc.payload().len();
    (total as u32, RECORD_PAYLOAD_OFFSET as u32)
}

/// Returns the encoded size of a root-hash record.
pub fn root_hash_record_size() -> u32 {
    MIN_RECORD_LEN as u32
}

/// Serializes a chunk record into `buf`.
///
/// `buf` must be exactly the size reported by [`chunk_record_size`].
pub fn write_chunk_record(buf: &mut [u8], cc: &CompressedChunk) {
    debug_assert_eq!(buf.len(), MIN_RECORD_LEN + cc.payload().len());
    write_record(buf, RecordKind::Chunk, cc.address(), cc.payload());
}

/// Serializes a root-hash record into `buf`.
///
/// `buf` must be exactly the size reported by [`root_hash_record_size`].
pub fn write_root_hash_record(buf: &mut [u8], root: &Address) {
    debug_assert_eq!(buf.len(), MIN_RECORD_LEN);
    write_record(buf, RecordKind::RootHash, root, &[]);
}

fn write_record(buf: &mut [u8], kind: RecordKind, address: &Address, payload: &[u8]) {
    let total = buf.len();
    LittleEndian::write_u32(&mut buf[..RECORD_LEN_BYTES], total as u32);
    buf[RECORD_LEN_BYTES] = kind as u8;
    buf[RECORD_LEN_BYTES + RECORD_KIND_BYTES..RECORD_PAYLOAD_OFFSET]
        .copy_from_slice(address.as_bytes());
    buf[RECORD_PAYLOAD_OFFSET..total - RECORD_CHECKSUM_BYTES].copy_from_slice(payload);
    let checksum = record_checksum(&buf[..total - RECORD_CHECKSUM_BYTES]);
    LittleEndian::write_u32(&mut buf[total - RECORD_CHECKSUM_BYTES..], checksum);
}

/// Validates the framing of `bytes` without decoding the kind.
///
/// Returns the record length on success. Used by the forward scan, which
/// treats a framing failure as end-of-valid-data rather than an error.
fn validate_framing(bytes: &[u8]) -> Option<u32> {
    if bytes.len() < MIN_RECORD_LEN {
        return None;
    }
    let length = LittleEndian::read_u32(&bytes[..RECORD_LEN_BYTES]) as usize;
    if length < MIN_RECORD_LEN || length > bytes.len() {
        return None;
    }
    let stored = LittleEndian::read_u32(&bytes[length - RECORD_CHECKSUM_BYTES..length]);
    if record_checksum(&bytes[..length - RECORD_CHECKSUM_BYTES]) != stored {
        return None;
    }
    Some(length as u32)
}

/// Decodes a journal record from `bytes`.
///
/// Fails with [`JournalError::CorruptRecord`] when the length or checksum
/// does not validate, and with [`JournalError::UnknownRecordKind`] when the
/// framing validates but the kind tag is unrecognized.
pub fn read_journal_record(bytes: &[u8]) -> JournalResult<JournalRecord> {
    let length = validate_framing(bytes)
        .ok_or_else(|| JournalError::corrupt("record length or checksum does not validate"))?
        as usize;

    let kind = RecordKind::try_from(bytes[RECORD_LEN_BYTES])?;
    let mut address = [0u8; ADDRESS_LEN];
    address.copy_from_slice(&bytes[RECORD_LEN_BYTES + RECORD_KIND_BYTES..RECORD_PAYLOAD_OFFSET]);
    let payload = bytes[RECORD_PAYLOAD_OFFSET..length - RECORD_CHECKSUM_BYTES].to_vec();

    Ok(JournalRecord {
        length: length as u32,
        kind,
        address: Address::new(address),
        payload,
    })
}

/// Forward-scans journal records from offset zero.
///
/// Invokes `on_record` with each record's starting offset. The scan stops at
/// the first record whose framing is invalid, which in a healthy journal is
/// the zero-filled tail, and returns the offset of the first invalid byte.
/// Errors from `on_record` and unknown kind tags propagate.
pub fn process_journal_records<F>(file: &mut File, mut on_record: F) -> JournalResult<u64>
where
    F: FnMut(u64, &JournalRecord) -> JournalResult<()>,
{
    let file_len = file.metadata()?.len();
    file.seek(SeekFrom::Start(0))?;
    let mut reader = BufReader::with_capacity(1024 * 1024, file);

    let mut offset = 0u64;
    let mut record_buf = Vec::new();

    loop {
        let remaining = file_len - offset;
        if remaining < MIN_RECORD_LEN as u64 {
            break;
        }

        let mut len_prefix = [0u8; RECORD_LEN_BYTES];
        reader.read_exact(&mut len_prefix)?;
        let length = LittleEndian::read_u32(&len_prefix) as u64;

        if length == 0 {
            debug!(offset, "journal scan reached zero-filled tail");
            break;
        }
        if length < MIN_RECORD_LEN as u64 || length > remaining {
            warn!(offset, length, "journal scan stopped at invalid record length");
            break;
        }

        record_buf.resize(length as usize, 0);
        record_buf[..RECORD_LEN_BYTES].copy_from_slice(&len_prefix);
        reader.read_exact(&mut record_buf[RECORD_LEN_BYTES..])?;

        if validate_framing(&record_buf).is_none() {
            warn!(offset, length, "journal scan stopped at checksum mismatch");
            break;
        }

        let record = read_journal_record(&record_buf)?;
        on_record(offset, &record)?;
        offset += length;
    }

    Ok(offset)
}
