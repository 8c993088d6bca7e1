//! Epoch façade
//!
//! One epoch combines a field index (field-set → block store row) with a
//! block store (row × position → payload) under a single directory. The
//! database keeps epochs in its LRU caches and closes them on eviction.
//!
//! An epoch opened read-only uses a read-only index and read-only block
//! store; mutations fail with `ReadOnlyStore`.

use crate::block::{BlockOptions, BlockStore};
use crate::error::{Error, Result};
use crate::index::{Index, IndexMetrics, IndexOptions, Item};
use std::path::PathBuf;
use std::sync::Arc;

/// Name of the index log file inside an epoch directory.
const INDEX_FILE: &str = "index";

/// Options for opening an [`Epoch`].
#[derive(Debug, Clone)]
pub struct EpochOptions {
    /// Epoch directory
    pub path: PathBuf,
    /// Bytes per payload
    pub payload_size: u32,
    /// Positions per epoch (`duration / resolution`)
    pub row_len: u32,
    /// Rows per block store segment
    pub segment_size: u32,
    /// Open for queries only
    pub read_only: bool,
}

/// An open epoch: field index plus block store.
pub struct Epoch {
    index: Arc<Index>,
    block: BlockStore,
}

impl Epoch {
    /// Opens an epoch, creating its directory when opened for writing.
    pub fn open(options: &EpochOptions) -> Result<Self> {
        if !options.read_only {
            std::fs::create_dir_all(&options.path)?;
        }

        let index = Index::open(IndexOptions {
            path: options.path.join(INDEX_FILE),
            read_only: options.read_only,
        })?;

        let block = BlockStore::open(BlockOptions {
            dir: options.path.clone(),
            payload_size: options.payload_size,
            row_len: options.row_len,
            segment_size: options.segment_size,
            read_only: options.read_only,
        })?;

        Ok(Epoch { index, block })
    }

    /// Writes one payload at a position, resolving or creating the
    /// field-set's row.
    pub fn put(&self, pos: u32, fields: &[String], payload: &[u8]) -> Result<()> {
        let row = match self.index.one(fields) {
            Ok(item) => item.value,
            Err(Error::ItemNotFound) => {
                let row = self.block.add()?;
                match self.index.put(fields, row) {
                    Ok(()) => row,
                    // another writer created the same field-set first;
                    // its row wins, ours stays allocated but unused
                    Err(Error::Exists(_)) => self.index.one(fields)?.value,
                    Err(e) => return Err(e),
                }
            }
            Err(e) => return Err(e),
        };

        self.block.put(row, pos, payload)
    }

    /// Exact field-set range query over `[start_pos, end_pos)`.
    pub fn one(&self, start_pos: u32, end_pos: u32, fields: &[String]) -> Result<Vec<Vec<u8>>> {
        let item = self.index.one(fields)?;
        self.block.get(item.value, start_pos, end_pos)
    }

    /// Wildcard range query; one payload sequence per matched field-set.
    pub fn get(
        &self,
        start_pos: u32,
        end_pos: u32,
        fields: &[String],
    ) -> Result<Vec<(Item, Vec<Vec<u8>>)>> {
        let items = self.index.get(fields)?;
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let points = self.block.get(item.value, start_pos, end_pos)?;
            out.push((item, points));
        }
        Ok(out)
    }

    /// Index metrics of this epoch.
    pub fn metrics(&self) -> IndexMetrics {
        self.index.metrics()
    }

    /// Flushes the index and block store to disk.
    pub fn sync(&self) -> Result<()> {
        self.index.sync()?;
        self.block.sync()
    }

    /// Closes the index, then the block store.
    pub fn close(&self) -> Result<()> {
        self.index.close()?;
        self.block.close()
    }
}
