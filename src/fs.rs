//! Filesystem helpers for the journal: fixed-size file creation, directory
//! syncing, and positional I/O shims.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::JournalResult;

/// Batch size used when zero-filling a freshly created journal file.
const ZERO_FILL_BATCH: usize = 1024 * 1024;

/// Resolves `path` to an absolute path without requiring it to exist.
pub(crate) fn absolute_path(path: &Path) -> JournalResult<PathBuf> {
    Ok(std::path::absolute(path)?)
}

/// Creates a read-write file at `path` and zero-fills it to exactly `len`
/// bytes in fixed-size batches, then fsyncs and rewinds to offset zero.
///
/// The zero fill is what makes recovery a pure forward scan: a record whose
/// length or checksum field is zero can never validate, so the first invalid
/// framing marks end-of-data.
pub fn create_fixed_size_file(path: &Path, len: u64) -> JournalResult<File> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(path)?;

    let zeros = vec![0u8; ZERO_FILL_BATCH];
    let mut written = 0u64;
    while written < len {
        let batch = (len - written).min(ZERO_FILL_BATCH as u64) as usize;
        file.write_all(&zeros[..batch])?;
        written += batch as u64;
    }
    file.sync_data()?;

    let offset = file.seek(SeekFrom::Start(0))?;
    if offset != 0 {
        return Err(io::Error::other(format!(
            "expected file offset 0 after rewind, got {offset}"
        ))
        .into());
    }
    Ok(file)
}

/// Fsyncs the directory containing `path` so a freshly created file's
/// directory entry is durable.
pub fn fsync_dir(path: &Path) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    File::open(dir)?.sync_all()
}

/// Reads exactly `buf.len()` bytes from `file` at `offset` without moving
/// the file's own cursor.
#[cfg(unix)]
pub(crate) fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

/// Writes all of `buf` to `file` at `offset` without moving the file's own
/// cursor.
#[cfg(unix)]
pub(crate) fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
pub(crate) fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ));
            }
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(windows)]
pub(crate) fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write whole buffer",
                ));
            }
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn fixed_size_file_is_zero_filled() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("journal");
        let file = create_fixed_size_file(&path, 4096 + 17).expect("create");
        drop(file);

        let mut contents = Vec::new();
        File::open(&path)
            .expect("open")
            .read_to_end(&mut contents)
            .expect("read");
        assert_eq!(contents.len(), 4096 + 17);
        assert!(contents.iter().all(|b| *b == 0));
    }

    #[test]
    fn fixed_size_file_rejects_existing() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("journal");
        create_fixed_size_file(&path, 64).expect("create");
        assert!(create_fixed_size_file(&path, 64).is_err());
    }

    #[test]
    fn positional_io_roundtrip() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("blob");
        let file = create_fixed_size_file(&path, 1024).expect("create");

        write_all_at(&file, b"hello journal", 100).expect("write_all_at");
        let mut buf = [0u8; 13];
        read_exact_at(&file, &mut buf, 100).expect("read_exact_at");
        assert_eq!(&buf, b"hello journal");

        // The descriptor cursor stays where the rewind left it.
        let mut first = [0u8; 4];
        let mut handle = &file;
        handle.read_exact(&mut first).expect("cursor read");
        assert_eq!(first, [0u8; 4]);
    }
}
