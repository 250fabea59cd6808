//! Append-only chunk journal for a content-addressed, versioned storage
//! engine.
//!
//! The journal is a single pre-allocated file that durably stores compressed,
//! content-addressed chunks and the evolving database root hash. It serves a
//! writer that appends chunk and root-hash records, readers that materialize
//! chunks by address, and backup consumers that stream a consistent prefix.
//!
//! ## Architecture
//!
//! - **Record codec** ([`record`]): self-delimiting, self-checksummed framing
//!   shared by chunk and root-hash records.
//! - **Journal writer** ([`journal`]): owns the write buffer, the append
//!   offset, and the address lookup index; serves straddled reads spanning
//!   the flushed file and the in-memory tail; produces independently-
//!   lifetimed snapshots.
//! - **Recovery**: on open the journal is forward-scanned from offset zero.
//!   The file is zero-filled at creation and never grows, so the first record
//!   whose framing fails to validate marks end-of-data; no length header is
//!   kept, and no header/data divergence is possible.
//!
//! ## Durability model
//!
//! Chunk appends are buffered and not individually synced. Writing a root
//! hash flushes the buffer and fsyncs the file: it is both a commit marker in
//! the record stream and the sole durability barrier. After a crash, replay
//! recovers every record up to the last valid framing and returns the most
//! recent root hash.
//!
//! ## Example
//!
//! ```no_run
//! use chunk_journal::{Address, ChunkJournal, CompressedChunk, JournalConfig};
//!
//! # fn demo(cc: CompressedChunk, root: Address) -> chunk_journal::JournalResult<()> {
//! let config = JournalConfig::default();
//! let path = std::path::Path::new("/var/data/journal");
//!
//! let journal = match ChunkJournal::open(path, config)? {
//!     Some(journal) => {
//!         let last_root = journal.process_journal()?;
//!         println!("recovered root {last_root}");
//!         journal
//!     }
//!     None => ChunkJournal::create(path, config)?,
//! };
//!
//! journal.write_chunk(&cc)?;
//! journal.write_root_hash(&root)?;
//! assert!(journal.has(cc.address())?);
//! journal.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Thread safety
//!
//! One readers-writer lock guards the journal: appends, snapshots, replay,
//! and close take it exclusively; queries and reads take it shared. A single
//! logical writer is assumed; readers may be arbitrary threads.

pub mod chunk;
pub mod config;
pub mod error;
pub mod fs;
pub mod journal;
pub mod record;

pub use chunk::{is_journal_address, Address, CompressedChunk, ADDRESS_LEN, JOURNAL_ADDRESS};
pub use config::JournalConfig;
pub use error::{JournalError, JournalResult};
pub use fs::{create_fixed_size_file, fsync_dir};
pub use journal::{
    journal_file_exists, ChunkJournal, JournalSnapshot, RecordLookup, RecordRange,
};
pub use record::{
    chunk_record_size, process_journal_records, read_journal_record, root_hash_record_size,
    write_chunk_record, write_root_hash_record, JournalRecord, RecordKind, MIN_RECORD_LEN,
    RECORD_PAYLOAD_OFFSET,
};
