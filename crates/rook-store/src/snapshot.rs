//! Snapshot export and restore for shard state transfer.
//!
//! A snapshot is a self-describing byte stream: for every declared key range,
//! a descriptor (tag, lower bound, upper bound), the number of keys, and the
//! length-prefixed key/value pairs, terminated by an end marker. Restoring
//! clears the covered ranges before inserting, so the stream installs the
//! complete state of those ranges; keys outside the declared set are
//! untouched.
//!
//! Export runs inside a single read transaction, so the stream is a
//! consistent point-in-time view across every range. The per-range key count
//! is computed with a first scan pass so it can precede the data without
//! buffering the range in memory.

use std::io::Read;
use std::io::Write;

use tracing::debug;

use crate::store::KeyRange;
use crate::store::Store;
use crate::store::StoreError;

/// A range descriptor follows.
const TAG_RANGE: u8 = 0x01;
/// End of stream.
const TAG_END: u8 = 0x00;

/// Export the contents of `ranges` as a snapshot stream.
pub fn export(store: &Store, ranges: &[KeyRange], writer: &mut dyn Write) -> Result<(), StoreError> {
    let txn = store.view()?;

    for range in ranges {
        let (lower, upper) = range.scan_bounds();

        let mut count: u64 = 0;
        txn.for_each_in_range(&lower, upper.as_deref(), |_, _| {
            count += 1;
            Ok(())
        })?;

        write_all(writer, &[TAG_RANGE])?;
        write_bytes(writer, &range.lower)?;
        write_bytes(writer, &range.upper)?;
        write_all(writer, &count.to_be_bytes())?;

        txn.for_each_in_range(&lower, upper.as_deref(), |key, value| {
            write_bytes(writer, key)?;
            write_bytes(writer, value)
        })?;
    }

    write_all(writer, &[TAG_END])?;
    debug!(ranges = ranges.len(), "snapshot exported");
    Ok(())
}

/// Install a snapshot stream as the complete state of `ranges`.
///
/// The declared ranges are cleared first, inside the same transaction that
/// inserts the streamed pairs; a torn restore is impossible. Every descriptor
/// in the stream must match one of the declared ranges.
pub fn restore(store: &Store, ranges: &[KeyRange], reader: &mut dyn Read) -> Result<(), StoreError> {
    let mut txn = store.update()?;

    for range in ranges {
        let (lower, upper) = range.scan_bounds();
        txn.clear_range(&lower, upper.as_deref())?;
    }

    let mut restored: u64 = 0;
    loop {
        let tag = read_u8(reader)?;
        match tag {
            TAG_END => break,
            TAG_RANGE => {
                let lower = read_bytes(reader)?;
                let upper = read_bytes(reader)?;
                // Built without `KeyRange::new`: stream contents are
                // untrusted and must fail softly, not assert.
                let declared = KeyRange { lower, upper };
                if !ranges.contains(&declared) {
                    return Err(StoreError::SnapshotFormat {
                        message: format!("stream declares undeclared range {declared:?}"),
                    });
                }

                let count = read_u64(reader)?;
                for _ in 0..count {
                    let key = read_bytes(reader)?;
                    let value = read_bytes(reader)?;
                    debug_assert!(declared.contains(&key), "SNAPSHOT: streamed key outside its range");
                    txn.set(&key, &value)?;
                }
                restored += count;
            }
            other => {
                return Err(StoreError::SnapshotFormat {
                    message: format!("unknown section tag {other:#04x}"),
                });
            }
        }
    }

    txn.commit()?;
    debug!(ranges = ranges.len(), keys = restored, "snapshot restored");
    Ok(())
}

fn write_all(writer: &mut dyn Write, bytes: &[u8]) -> Result<(), StoreError> {
    writer.write_all(bytes).map_err(|source| StoreError::SnapshotIo { source })
}

fn write_bytes(writer: &mut dyn Write, bytes: &[u8]) -> Result<(), StoreError> {
    write_all(writer, &(bytes.len() as u32).to_be_bytes())?;
    write_all(writer, bytes)
}

fn read_u8(reader: &mut dyn Read) -> Result<u8, StoreError> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf).map_err(|source| StoreError::SnapshotIo { source })?;
    Ok(buf[0])
}

fn read_u64(reader: &mut dyn Read) -> Result<u64, StoreError> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf).map_err(|source| StoreError::SnapshotIo { source })?;
    Ok(u64::from_be_bytes(buf))
}

fn read_bytes(reader: &mut dyn Read) -> Result<Vec<u8>, StoreError> {
    let mut len = [0u8; 4];
    reader.read_exact(&mut len).map_err(|source| StoreError::SnapshotIo { source })?;
    let mut buf = vec![0u8; u32::from_be_bytes(len) as usize];
    reader.read_exact(&mut buf).map_err(|source| StoreError::SnapshotIo { source })?;
    Ok(buf)
}
