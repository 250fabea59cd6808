use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::JournalError;

/// Width of a chunk address in bytes.
pub const ADDRESS_LEN: usize = 20;

/// Content-addressed identifier for a chunk.
///
/// Addresses are opaque 20-byte values assigned by the surrounding storage
/// engine's hash function. The journal treats them as map keys and record
/// fields only; it never computes them.
///
/// # Example
///
/// ```rust
/// use chunk_journal::Address;
///
/// let addr: Address = "00112233445566778899aabbccddeeff00112233".parse().unwrap();
/// assert_eq!(addr.to_string(), "00112233445566778899aabbccddeeff00112233");
/// ```
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub [u8; ADDRESS_LEN]);

/// Address reserved for the journal itself.
///
/// The surrounding engine names the journal with the 32-character string
/// `"vvvv…v"` in its base32 address alphabet, which decodes to all bits set.
/// The sentinel identifies the journal as a chunk source to outer callers and
/// is never used as a lookup key.
pub const JOURNAL_ADDRESS: Address = Address([0xFF; ADDRESS_LEN]);

/// Returns true if `addr` is the reserved journal sentinel.
#[inline]
pub fn is_journal_address(addr: &Address) -> bool {
    *addr == JOURNAL_ADDRESS
}

impl Address {
    /// The all-zero address, returned by replay when no root-hash record exists.
    pub const ZERO: Address = Address([0u8; ADDRESS_LEN]);

    /// Creates an address from its raw bytes.
    #[inline]
    pub const fn new(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the raw address bytes.
    #[inline]
    pub const fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }
}

impl From<[u8; ADDRESS_LEN]> for Address {
    #[inline]
    fn from(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Address {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for Address {
    type Err = JournalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != ADDRESS_LEN * 2 {
            return Err(JournalError::corrupt(format!(
                "address must be {} hex characters, got {}",
                ADDRESS_LEN * 2,
                s.len()
            )));
        }
        let mut bytes = [0u8; ADDRESS_LEN];
        for (i, chunk) in s.as_bytes().chunks_exact(2).enumerate() {
            let hi = hex_value(chunk[0])?;
            let lo = hex_value(chunk[1])?;
            bytes[i] = (hi << 4) | lo;
        }
        Ok(Self(bytes))
    }
}

fn hex_value(c: u8) -> Result<u8, JournalError> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(JournalError::corrupt(format!(
            "invalid hex character in address: {}",
            c as char
        ))),
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A pre-compressed chunk addressed by its content hash.
///
/// Payloads arrive already compressed by the engine's codec and begin with
/// the uncompressed length as a LEB128 varint, followed by the compressed
/// bytes. The journal stores payloads verbatim and only reads the varint
/// prefix for its running uncompressed-size statistic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedChunk {
    address: Address,
    payload: Vec<u8>,
}

impl CompressedChunk {
    /// Wraps a compressed payload under its content address.
    pub fn new(address: Address, payload: Vec<u8>) -> Self {
        Self { address, payload }
    }

    /// The chunk's content address.
    #[inline]
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// The compressed payload bytes, varint length prefix included.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Decodes the uncompressed length from the payload's varint prefix.
    ///
    /// Returns 0 for payloads without a decodable prefix.
    pub fn uncompressed_len(&self) -> u64 {
        decode_uvarint(&self.payload).unwrap_or(0)
    }
}

/// Decodes a LEB128 unsigned varint from the front of `bytes`.
pub(crate) fn decode_uvarint(bytes: &[u8]) -> Option<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for &byte in bytes.iter().take(10) {
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Some(value);
        }
        shift += 7;
    }
    None
}

/// Encodes `value` as a LEB128 unsigned varint appended to `out`.
pub(crate) fn encode_uvarint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_hex_roundtrip() {
        let addr = Address::new([0xAB; ADDRESS_LEN]);
        let parsed: Address = addr.to_string().parse().expect("parse");
        assert_eq!(addr, parsed);
    }

    #[test]
    fn address_rejects_bad_input() {
        assert!("abcd".parse::<Address>().is_err());
        assert!("zz112233445566778899aabbccddeeff00112233"
            .parse::<Address>()
            .is_err());
    }

    #[test]
    fn journal_sentinel_is_all_ones() {
        assert!(is_journal_address(&JOURNAL_ADDRESS));
        assert!(JOURNAL_ADDRESS.as_bytes().iter().all(|b| *b == 0xFF));
        assert!(!is_journal_address(&Address::ZERO));
    }

    #[test]
    fn uvarint_roundtrip() {
        for value in [0u64, 1, 127, 128, 300, 1 << 20, u64::MAX] {
            let mut buf = Vec::new();
            encode_uvarint(value, &mut buf);
            assert_eq!(decode_uvarint(&buf), Some(value));
        }
    }

    #[test]
    fn uncompressed_len_reads_prefix() {
        let mut payload = Vec::new();
        encode_uvarint(4096, &mut payload);
        payload.extend_from_slice(b"compressed bytes");
        let cc = CompressedChunk::new(Address::ZERO, payload);
        assert_eq!(cc.uncompressed_len(), 4096);
    }

    #[test]
    fn uncompressed_len_tolerates_empty_payload() {
        let cc = CompressedChunk::new(Address::ZERO, Vec::new());
        assert_eq!(cc.uncompressed_len(), 0);
    }
}
