use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// Minimum allowed journal file size (16 MiB).
///
/// Smaller files defeat the point of pre-allocation: the zero-filled tail is
/// what lets recovery find end-of-data without a persisted length header.
const JOURNAL_FILE_MIN_BYTES: u64 = 16 * 1024 * 1024;

/// Maximum allowed journal file size (~4 GiB).
///
/// Record lengths and lookup entries use u32 offsets internally relative to
/// the buffer; bounding the file keeps the forward scan on open tractable.
const JOURNAL_FILE_MAX_BYTES: u64 = u32::MAX as u64;

/// Minimum write buffer capacity (4 KiB).
const WRITE_BUFFER_MIN_BYTES: u64 = 4 * 1024;

/// Default pre-allocated journal file size.
const DEFAULT_JOURNAL_FILE_BYTES: u64 = 256 * 1024 * 1024;

/// Default write buffer capacity.
///
/// The buffer must hold an entire record, so this doubles as the record-size
/// upper bound.
const DEFAULT_WRITE_BUFFER_BYTES: u64 = 1024 * 1024;

/// Rounds `value` to the nearest power of two inside `[min, max]`.
///
/// `min` must be a power of two; `max` need not be (the file-size ceiling is
/// `u32::MAX`), and the result is always a power of two regardless. Midway
/// values round down.
#[inline]
fn nearest_power_of_two_in(value: u64, min: u64, max: u64) -> u64 {
    debug_assert!(min.is_power_of_two());
    let clamped = value.clamp(min, max);
    if clamped.is_power_of_two() {
        return clamped;
    }
    let below = 1_u64 << (63 - clamped.leading_zeros());
    let above = below.saturating_mul(2);
    if above > max || clamped - below <= above - clamped {
        below
    } else {
        above
    }
}

/// Configuration surface for a chunk journal.
///
/// The defaults are the reference parameters: a 256 MiB pre-allocated file
/// and a 1 MiB write buffer. Both are normalized into a power-of-two window
/// before use.
///
/// # Example
///
/// ```rust
/// use chunk_journal::JournalConfig;
///
/// let config = JournalConfig {
///     write_buffer_bytes: 64 * 1024,
///     ..JournalConfig::default()
/// }
/// .normalized();
/// assert_eq!(config.write_buffer_bytes, 64 * 1024);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Total pre-allocated size of the journal file (bytes).
    ///
    /// The file is zero-filled to this length at create time and never grows
    /// or shrinks afterwards. Logical content is the record prefix; the
    /// remainder stays zero.
    pub journal_file_bytes: u64,

    /// Capacity of the in-memory write buffer (bytes).
    ///
    /// Appended records accumulate here before being written to the file in
    /// batches. Every record must fit the buffer whole, so this is also the
    /// hard upper bound on a single encoded record.
    pub write_buffer_bytes: u64,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            journal_file_bytes: DEFAULT_JOURNAL_FILE_BYTES,
            write_buffer_bytes: DEFAULT_WRITE_BUFFER_BYTES,
        }
    }
}

impl JournalConfig {
    /// Returns a copy of the configuration clamped into the supported
    /// power-of-two window, with `write_buffer_bytes <= journal_file_bytes`
    /// enforced.
    pub fn normalized(mut self) -> Self {
        let file_raw = if self.journal_file_bytes == 0 {
            DEFAULT_JOURNAL_FILE_BYTES
        } else {
            self.journal_file_bytes
        };
        self.journal_file_bytes =
            nearest_power_of_two_in(file_raw, JOURNAL_FILE_MIN_BYTES, JOURNAL_FILE_MAX_BYTES);

        let buffer_raw = if self.write_buffer_bytes == 0 {
            DEFAULT_WRITE_BUFFER_BYTES
        } else {
            self.write_buffer_bytes
        };
        self.write_buffer_bytes =
            nearest_power_of_two_in(buffer_raw, WRITE_BUFFER_MIN_BYTES, self.journal_file_bytes);

        self
    }
}

impl Display for JournalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "JournalConfig(journal_file_bytes={}, write_buffer_bytes={})",
            self.journal_file_bytes, self.write_buffer_bytes
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_reasonable() {
        let cfg = JournalConfig::default();
        assert!(cfg.journal_file_bytes.is_power_of_two());
        assert!(cfg.write_buffer_bytes.is_power_of_two());
        assert!(cfg.journal_file_bytes >= JOURNAL_FILE_MIN_BYTES);
        assert!(cfg.write_buffer_bytes <= cfg.journal_file_bytes);
        assert_eq!(cfg, cfg.normalized());
    }

    #[test]
    fn normalized_clamps_bounds() {
        let cfg = JournalConfig {
            journal_file_bytes: 100 * 1024 * 1024,
            write_buffer_bytes: 700 * 1024,
        }
        .normalized();

        assert_eq!(cfg.journal_file_bytes, 128 * 1024 * 1024);
        assert_eq!(cfg.write_buffer_bytes, 512 * 1024);
    }

    #[test]
    fn normalized_replaces_zero_with_defaults() {
        let cfg = JournalConfig {
            journal_file_bytes: 0,
            write_buffer_bytes: 0,
        }
        .normalized();

        assert_eq!(cfg, JournalConfig::default());
    }

    #[test]
    fn normalization_stays_power_of_two_under_ragged_max() {
        // The file-size ceiling is u32::MAX, which is not a power of two;
        // rounding must still land on one.
        let cfg = JournalConfig {
            journal_file_bytes: 3 * 1024 * 1024 * 1024,
            write_buffer_bytes: 1024 * 1024,
        }
        .normalized();

        assert!(cfg.journal_file_bytes.is_power_of_two());
        assert_eq!(cfg.journal_file_bytes, 2 * 1024 * 1024 * 1024);
    }

    #[test]
    fn buffer_never_exceeds_file() {
        let cfg = JournalConfig {
            journal_file_bytes: JOURNAL_FILE_MIN_BYTES,
            write_buffer_bytes: u64::MAX,
        }
        .normalized();

        assert!(cfg.write_buffer_bytes <= cfg.journal_file_bytes);
    }

    #[test]
    fn serde_round_trip() {
        let cfg = JournalConfig::default();
        let json = serde_json::to_string(&cfg).expect("serialize");
        let decoded: JournalConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(cfg, decoded);
    }
}
