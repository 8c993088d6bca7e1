//! Append log storage for the field index
//!
//! The log lives in a memory-mapped file preallocated with zeros in
//! 25 MiB steps. Records are laid out back to back:
//!
//! - length: u32 LE (4 bytes)
//! - payload: [u8; length] (wire-encoded index item)
//!
//! A zero length terminates the live region. A nonzero length that
//! extends past the mapped region means the file was truncated or
//! corrupted and is reported as such.

use crate::error::{Error, Result};
use memmap2::MmapMut;

/// Bytes added to the mapped file whenever it runs out of space.
pub(crate) const PREALLOC_SIZE: u64 = 25 * 1024 * 1024;

/// Minimum slack to keep in the map before triggering a background
/// preallocation.
pub(crate) const PREALLOC_THRESHOLD: u64 = 5 * 1024 * 1024;

/// Bytes of metadata stored with each record (the length prefix).
pub(crate) const RECORD_HEADER_SIZE: u64 = 4;

/// Mutable state of a writable log: the mapping and the used byte count.
#[derive(Debug)]
pub(crate) struct LogState {
    pub map: MmapMut,
    pub data_size: u64,
}

impl LogState {
    /// Appends one record, returning `false` when the map has no room.
    pub fn append(&mut self, payload: &[u8]) -> bool {
        let needed = RECORD_HEADER_SIZE as usize + payload.len();
        let offset = self.data_size as usize;
        if offset + needed > self.map.len() {
            return false;
        }

        self.map[offset..offset + 4].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        self.map[offset + 4..offset + needed].copy_from_slice(payload);
        self.data_size += needed as u64;
        true
    }
}

/// Iterator over raw records in a log buffer.
///
/// Yields `(record_offset, payload)` pairs and stops at a zero length or
/// the end of the buffer.
pub(crate) struct RecordIter<'a> {
    data: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = Result<(usize, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let header = RECORD_HEADER_SIZE as usize;
        if self.offset + header > self.data.len() {
            // exact end of file, only possible on an unpreallocated log
            self.done = true;
            return None;
        }

        let len = u32::from_le_bytes([
            self.data[self.offset],
            self.data[self.offset + 1],
            self.data[self.offset + 2],
            self.data[self.offset + 3],
        ]) as usize;

        if len == 0 {
            // reached the zeroed preallocated region
            self.done = true;
            return None;
        }

        let start = self.offset + header;
        if start + len > self.data.len() {
            self.done = true;
            return Some(Err(Error::CorruptLog(format!(
                "record of {} bytes at offset {} overruns the {} byte map",
                len,
                self.offset,
                self.data.len()
            ))));
        }

        let record_offset = self.offset;
        self.offset = start + len;
        Some(Ok((record_offset, &self.data[start..start + len])))
    }
}

/// Scans the live region of a log buffer.
pub(crate) fn scan_records(data: &[u8]) -> RecordIter<'_> {
    RecordIter {
        data,
        offset: 0,
        done: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_with(records: &[&[u8]], trailing_zeros: usize) -> Vec<u8> {
        let mut buf = Vec::new();
        for r in records {
            buf.extend_from_slice(&(r.len() as u32).to_le_bytes());
            buf.extend_from_slice(r);
        }
        buf.extend(std::iter::repeat(0).take(trailing_zeros));
        buf
    }

    #[test]
    fn test_scan_stops_at_zero_length() {
        let buf = log_with(&[b"one", b"four"], 64);
        let records: Vec<_> = scan_records(&buf).collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], (0, &b"one"[..]));
        assert_eq!(records[1], (7, &b"four"[..]));
    }

    #[test]
    fn test_scan_stops_at_eof() {
        let buf = log_with(&[b"abc"], 0);
        let records: Vec<_> = scan_records(&buf).collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_scan_reports_overrun() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1000u32.to_le_bytes());
        buf.extend_from_slice(&[0xAB; 8]);

        let err = scan_records(&buf).last().unwrap().unwrap_err();
        assert!(matches!(err, Error::CorruptLog(_)));
    }

    #[test]
    fn test_scan_empty_buffer() {
        assert_eq!(scan_records(&[]).count(), 0);
        assert_eq!(scan_records(&[0, 0, 0, 0]).count(), 0);
    }
}
