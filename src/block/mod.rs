//! Epoch-local block store
//!
//! Stores the fixed-size payloads of one epoch. Every distinct field-set
//! owns one *row* of `row_len` payload slots; the field index maps the
//! field-set to its row id. Rows are grouped `segment_size` per file.
//!
//! Segment file layout (`seg_{n}` under the epoch directory):
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ HEADER (32 bytes)                           │
//! │   magic: [u8; 4] = "EPBS"                   │
//! │   version: u16                              │
//! │   payload_size: u32                         │
//! │   row_len: u32                              │
//! │   segment_size: u32                         │
//! │   used: u32 (rows allocated, updated        │
//! │              in place)                      │
//! │   reserved: [u8; 10]                        │
//! ├─────────────────────────────────────────────┤
//! │ ROWS (segment_size × row_len × payload_size)│
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Files are preallocated with zeros at creation, so positions that were
//! never written read back as all-zero payloads. Writable stores map
//! their segments read-write; read-only stores use read-only maps.

use crate::error::{Error, Result};
use memmap2::{Mmap, MmapMut};
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

/// Magic bytes identifying a block segment file
const SEGMENT_MAGIC: [u8; 4] = *b"EPBS";

/// Current segment format version
const SEGMENT_VERSION: u16 = 1;

/// Header size in bytes
const HEADER_SIZE: usize = 32;

/// Prefix of segment file names
const SEGMENT_PREFIX: &str = "seg_";

/// Options for opening a [`BlockStore`].
#[derive(Debug, Clone)]
pub struct BlockOptions {
    /// Directory holding the segment files (the epoch directory)
    pub dir: PathBuf,
    /// Bytes per payload
    pub payload_size: u32,
    /// Payload slots per row (points per epoch)
    pub row_len: u32,
    /// Rows per segment file
    pub segment_size: u32,
    /// Open segments with read-only maps; mutations are refused
    pub read_only: bool,
}

/// Segment file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SegmentHeader {
    payload_size: u32,
    row_len: u32,
    segment_size: u32,
    used: u32,
}

impl SegmentHeader {
    fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&SEGMENT_MAGIC);
        buf[4..6].copy_from_slice(&SEGMENT_VERSION.to_le_bytes());
        buf[6..10].copy_from_slice(&self.payload_size.to_le_bytes());
        buf[10..14].copy_from_slice(&self.row_len.to_le_bytes());
        buf[14..18].copy_from_slice(&self.segment_size.to_le_bytes());
        buf[18..22].copy_from_slice(&self.used.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::CorruptLog("segment file too short".to_string()));
        }
        if buf[0..4] != SEGMENT_MAGIC {
            return Err(Error::CorruptLog(format!(
                "invalid segment magic: {:?}",
                &buf[0..4]
            )));
        }
        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version > SEGMENT_VERSION {
            return Err(Error::CorruptLog(format!(
                "unsupported segment version: {}",
                version
            )));
        }
        Ok(SegmentHeader {
            payload_size: u32::from_le_bytes([buf[6], buf[7], buf[8], buf[9]]),
            row_len: u32::from_le_bytes([buf[10], buf[11], buf[12], buf[13]]),
            segment_size: u32::from_le_bytes([buf[14], buf[15], buf[16], buf[17]]),
            used: u32::from_le_bytes([buf[18], buf[19], buf[20], buf[21]]),
        })
    }
}

#[derive(Debug)]
enum SegmentMap {
    Writable(MmapMut),
    ReadOnly(Mmap),
}

impl SegmentMap {
    fn bytes(&self) -> &[u8] {
        match self {
            SegmentMap::Writable(map) => map,
            SegmentMap::ReadOnly(map) => map,
        }
    }
}

#[derive(Debug)]
struct Segment {
    map: SegmentMap,
    used: u32,
}

impl Segment {
    fn set_used(&mut self, used: u32) -> Result<()> {
        self.used = used;
        match &mut self.map {
            SegmentMap::Writable(map) => {
                map[18..22].copy_from_slice(&used.to_le_bytes());
                Ok(())
            }
            SegmentMap::ReadOnly(_) => Err(Error::ReadOnlyStore),
        }
    }
}

#[derive(Debug)]
struct State {
    segments: Vec<Segment>,
    rows: u32,
}

/// Fixed-geometry payload array for one epoch.
#[derive(Debug)]
pub struct BlockStore {
    options: BlockOptions,
    state: Mutex<State>,
}

impl BlockStore {
    /// Opens the store, loading any existing segment files in order.
    pub fn open(options: BlockOptions) -> Result<Self> {
        let mut segments = Vec::new();

        loop {
            let path = options.dir.join(format!("{}{}", SEGMENT_PREFIX, segments.len()));
            if !path.exists() {
                break;
            }
            segments.push(Self::open_segment(&options, &path)?);
        }

        let rows = match segments.last() {
            Some(last) => (segments.len() as u32 - 1) * options.segment_size + last.used,
            None => 0,
        };

        Ok(BlockStore {
            options,
            state: Mutex::new(State { segments, rows }),
        })
    }

    /// Allocates the next row, creating a new segment file if needed.
    pub fn add(&self) -> Result<u32> {
        if self.options.read_only {
            return Err(Error::ReadOnlyStore);
        }

        let mut state = self.lock()?;
        let row = state.rows;
        if row == u32::MAX {
            return Err(Error::OutOfBounds("row id space exhausted".to_string()));
        }

        let segment_index = (row / self.options.segment_size) as usize;
        if segment_index == state.segments.len() {
            let segment = self.create_segment(segment_index)?;
            state.segments.push(segment);
        }

        let used_in_segment = row % self.options.segment_size + 1;
        state.segments[segment_index].set_used(used_in_segment)?;
        state.rows = row + 1;
        Ok(row)
    }

    /// Writes one payload at a position of a row.
    pub fn put(&self, row: u32, pos: u32, payload: &[u8]) -> Result<()> {
        if self.options.read_only {
            return Err(Error::ReadOnlyStore);
        }
        if payload.len() != self.options.payload_size as usize {
            return Err(Error::ShortWrite);
        }

        let mut state = self.lock()?;
        self.check_bounds(&state, row, pos, pos)?;

        let offset = self.offset_of(row, pos);
        let segment = &mut state.segments[(row / self.options.segment_size) as usize];
        match &mut segment.map {
            SegmentMap::Writable(map) => {
                map[offset..offset + payload.len()].copy_from_slice(payload);
                Ok(())
            }
            SegmentMap::ReadOnly(_) => Err(Error::ReadOnlyStore),
        }
    }

    /// Copies out the payloads of `[start_pos, end_pos)` for one row.
    pub fn get(&self, row: u32, start_pos: u32, end_pos: u32) -> Result<Vec<Vec<u8>>> {
        let state = self.lock()?;
        if start_pos > end_pos {
            return Err(Error::OutOfBounds(format!(
                "start position {} after end position {}",
                start_pos, end_pos
            )));
        }
        if start_pos == end_pos {
            return Ok(Vec::new());
        }
        self.check_bounds(&state, row, start_pos, end_pos - 1)?;

        let payload_size = self.options.payload_size as usize;
        let offset = self.offset_of(row, start_pos);
        let length = (end_pos - start_pos) as usize * payload_size;
        let segment = &state.segments[(row / self.options.segment_size) as usize];
        let data = &segment.map.bytes()[offset..offset + length];

        Ok(data.chunks(payload_size).map(|c| c.to_vec()).collect())
    }

    /// Number of allocated rows.
    pub fn rows(&self) -> u32 {
        self.lock().map(|state| state.rows).unwrap_or(0)
    }

    /// Flushes every writable segment map.
    pub fn sync(&self) -> Result<()> {
        let state = self.lock()?;
        for segment in &state.segments {
            if let SegmentMap::Writable(map) = &segment.map {
                map.flush()?;
            }
        }
        Ok(())
    }

    /// Flushes pending writes. Maps are released when the store drops.
    pub fn close(&self) -> Result<()> {
        self.sync()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state.lock().map_err(|e| Error::Lock(e.to_string()))
    }

    fn segment_file_len(&self) -> u64 {
        HEADER_SIZE as u64
            + u64::from(self.options.segment_size)
                * u64::from(self.options.row_len)
                * u64::from(self.options.payload_size)
    }

    fn offset_of(&self, row: u32, pos: u32) -> usize {
        let row_span = self.options.row_len as usize * self.options.payload_size as usize;
        HEADER_SIZE
            + (row % self.options.segment_size) as usize * row_span
            + pos as usize * self.options.payload_size as usize
    }

    fn check_bounds(&self, state: &State, row: u32, first_pos: u32, last_pos: u32) -> Result<()> {
        if row >= state.rows {
            return Err(Error::OutOfBounds(format!(
                "row {} beyond {} allocated rows",
                row, state.rows
            )));
        }
        if first_pos >= self.options.row_len || last_pos >= self.options.row_len {
            return Err(Error::OutOfBounds(format!(
                "position range {}..={} beyond row length {}",
                first_pos, last_pos, self.options.row_len
            )));
        }
        Ok(())
    }

    fn open_segment(options: &BlockOptions, path: &PathBuf) -> Result<Segment> {
        let expected_len = HEADER_SIZE as u64
            + u64::from(options.segment_size)
                * u64::from(options.row_len)
                * u64::from(options.payload_size);

        let (map, len) = if options.read_only {
            let file = File::open(path)?;
            let len = file.metadata()?.len();
            // Safety: read-only epochs are never written concurrently
            let map = unsafe { Mmap::map(&file)? };
            (SegmentMap::ReadOnly(map), len)
        } else {
            let file = OpenOptions::new().read(true).write(true).open(path)?;
            let len = file.metadata()?.len();
            // Safety: all writes go through the store mutex and the file
            // is owned by this store for the lifetime of the mapping
            let map = unsafe { MmapMut::map_mut(&file)? };
            (SegmentMap::Writable(map), len)
        };

        if len != expected_len {
            return Err(Error::CorruptLog(format!(
                "segment {:?} is {} bytes, expected {}",
                path, len, expected_len
            )));
        }

        let header = SegmentHeader::from_bytes(map.bytes())?;
        if header.payload_size != options.payload_size
            || header.row_len != options.row_len
            || header.segment_size != options.segment_size
        {
            return Err(Error::CorruptLog(format!(
                "segment {:?} geometry does not match the configured store",
                path
            )));
        }
        if header.used > options.segment_size {
            return Err(Error::CorruptLog(format!(
                "segment {:?} claims {} used rows of {}",
                path, header.used, options.segment_size
            )));
        }

        Ok(Segment {
            map,
            used: header.used,
        })
    }

    fn create_segment(&self, index: usize) -> Result<Segment> {
        let path = self.options.dir.join(format!("{}{}", SEGMENT_PREFIX, index));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        file.set_len(self.segment_file_len())?;

        // Safety: fresh file, exclusively owned by this store
        let mut map = unsafe { MmapMut::map_mut(&file)? };

        let header = SegmentHeader {
            payload_size: self.options.payload_size,
            row_len: self.options.row_len,
            segment_size: self.options.segment_size,
            used: 0,
        };
        map[..HEADER_SIZE].copy_from_slice(&header.to_bytes());

        Ok(Segment {
            map: SegmentMap::Writable(map),
            used: 0,
        })
    }
}
