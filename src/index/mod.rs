//! Field-set index
//!
//! A persistent trie keyed by ordered string tuples. Each stored item
//! associates a field-set with a `u32` value (a block store row id).
//! Items live in an in-memory trie rebuilt on open by replaying a
//! memory-mapped append-only log; new items are persisted to the log
//! before they become visible in memory, so an item observable after a
//! restart is guaranteed complete on disk.
//!
//! Queries:
//! - [`Index::one`]: exact lookup, wildcards rejected
//! - [`Index::get`]: subtree query; an empty string matches any edge at
//!   that depth, later non-empty fields act as post-filters
//!
//! Concurrency: appends and trie mutation are serialized together under
//! one lock (file order equals in-memory insertion order); map growth is
//! serialized by a separate allocation lock; readers share the trie
//! through a reader-writer lock.

mod log;

use crate::error::{Error, Result};
use crate::protocol::wire::{
    bytes_field_len, expect_wire, read_string, read_tag, read_uvarint, skip_field,
    uvarint_field_len, write_bytes_field, write_tag, write_uvarint, WIRE_BYTES, WIRE_VARINT,
};
use crate::protocol::Message;
use bytes::{Buf, BufMut};
use log::{scan_records, LogState, PREALLOC_SIZE, PREALLOC_THRESHOLD, RECORD_HEADER_SIZE};
use memmap2::{Mmap, MmapMut};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Sentinel value meaning "no value at this node".
pub const NO_VALUE: u32 = u32::MAX;

/// Options for opening an [`Index`].
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Path to the index log file
    pub path: PathBuf,
    /// Open for reading only; the map is released after replay
    pub read_only: bool,
}

/// One stored index entry: a field-set and its value.
///
/// Serialized with the wire codec: `fields` as repeated strings (tag 1),
/// `value` as a varint (tag 2).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Item {
    /// Ordered, non-empty field strings identifying the series
    pub fields: Vec<String>,
    /// Associated value; `NO_VALUE` marks an intermediate node
    pub value: u32,
}

impl Message for Item {
    fn encoded_len(&self) -> usize {
        let mut n = 0;
        for f in &self.fields {
            n += bytes_field_len(1, f.len());
        }
        if self.value != 0 {
            n += uvarint_field_len(2, u64::from(self.value));
        }
        n
    }

    fn encode_into(&self, buf: &mut impl BufMut) {
        for f in &self.fields {
            write_bytes_field(buf, 1, f.as_bytes());
        }
        if self.value != 0 {
            write_tag(buf, 2, WIRE_VARINT);
            write_uvarint(buf, u64::from(self.value));
        }
    }

    fn decode_from(buf: &mut impl Buf) -> Result<Self> {
        let mut msg = Self::default();
        while buf.has_remaining() {
            let (field, wire_type) = read_tag(buf)?;
            match field {
                1 => {
                    expect_wire(field, wire_type, WIRE_BYTES)?;
                    msg.fields.push(read_string(buf)?);
                }
                2 => {
                    expect_wire(field, wire_type, WIRE_VARINT)?;
                    let value = read_uvarint(buf)?;
                    msg.value = u32::try_from(value).map_err(|_| {
                        Error::MalformedFrame(format!("item value {} overflows u32", value))
                    })?;
                }
                _ => skip_field(buf, wire_type)?,
            }
        }
        Ok(msg)
    }
}

/// Runtime metrics of one index. Operation counters are reset on read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexMetrics {
    /// Trie nodes, including intermediates
    pub nodes: i64,
    /// Items inserted (including promotions)
    pub items: i64,
    /// Put operations since the last metrics read
    pub put_ops: i64,
    /// Get operations since the last metrics read
    pub get_ops: i64,
    /// One operations since the last metrics read
    pub one_ops: i64,
    /// Bytes used in the log
    pub data_size: u64,
    /// Bytes currently mapped
    pub mmap_size: u64,
}

#[derive(Default, Debug)]
struct Counters {
    nodes: AtomicI64,
    items: AtomicI64,
    put_ops: AtomicI64,
    get_ops: AtomicI64,
    one_ops: AtomicI64,
}

#[derive(Debug)]
struct Node {
    item: Item,
    children: HashMap<String, Node>,
}

impl Node {
    fn root() -> Self {
        Node {
            item: Item {
                fields: Vec::new(),
                value: NO_VALUE,
            },
            children: HashMap::new(),
        }
    }
}

/// Persistent field-set trie backed by a memory-mapped append log.
#[derive(Debug)]
pub struct Index {
    read_only: bool,
    file: Option<File>,
    root: RwLock<Node>,
    /// The add lock: serializes append + trie insertion together.
    log: Mutex<Option<LogState>>,
    /// The allocation lock: serializes map growth.
    alloc: Mutex<()>,
    allocating: AtomicBool,
    data_size: AtomicU64,
    mmap_size: AtomicU64,
    counters: Counters,
}

impl Index {
    /// Opens an index, replaying the log into the in-memory trie.
    ///
    /// Writable indexes are left with at least the preallocation
    /// threshold of slack in the map; read-only indexes release the map
    /// after replay.
    pub fn open(options: IndexOptions) -> Result<Arc<Self>> {
        let mut root = Node::root();
        let counters = Counters::default();

        if options.read_only {
            let file = File::open(&options.path)?;
            let len = file.metadata()?.len();
            let data_size = if len == 0 {
                0
            } else {
                // Safety: the mapping is dropped before this function
                // returns; read-only epochs are never written concurrently
                let map = unsafe { Mmap::map(&file)? };
                replay(&map, &mut root, &counters)?
            };

            return Ok(Arc::new(Index {
                read_only: true,
                file: None,
                root: RwLock::new(root),
                log: Mutex::new(None),
                alloc: Mutex::new(()),
                allocating: AtomicBool::new(false),
                data_size: AtomicU64::new(data_size),
                mmap_size: AtomicU64::new(0),
                counters,
            }));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&options.path)?;

        if file.metadata()?.len() == 0 {
            file.set_len(PREALLOC_SIZE)?;
        }

        // Safety: all writes to the map go through the add lock and the
        // file is owned by this index for the lifetime of the mapping
        let map = unsafe { MmapMut::map_mut(&file)? };
        let mmap_size = map.len() as u64;
        let data_size = replay(&map, &mut root, &counters)?;

        let index = Arc::new(Index {
            read_only: false,
            file: Some(file),
            root: RwLock::new(root),
            log: Mutex::new(Some(LogState { map, data_size })),
            alloc: Mutex::new(()),
            allocating: AtomicBool::new(false),
            data_size: AtomicU64::new(data_size),
            mmap_size: AtomicU64::new(mmap_size),
            counters,
        });

        index.ensure_slack()?;
        Ok(index)
    }

    /// Exact lookup. All fields must be non-empty.
    pub fn one(&self, fields: &[String]) -> Result<Item> {
        let root = self.root.read().map_err(|e| Error::Lock(e.to_string()))?;

        let mut node = &*root;
        for field in fields {
            if field.is_empty() {
                return Err(Error::Wildcard);
            }
            node = node.children.get(field).ok_or(Error::ItemNotFound)?;
        }

        if node.item.value == NO_VALUE {
            return Err(Error::ItemNotFound);
        }

        self.counters.one_ops.fetch_add(1, Ordering::SeqCst);
        Ok(node.item.clone())
    }

    /// Subtree query. An empty string matches any edge at that depth;
    /// non-empty fields after the first wildcard filter the collected
    /// items at their depth.
    pub fn get(&self, fields: &[String]) -> Result<Vec<Item>> {
        let root = self.root.read().map_err(|e| Error::Lock(e.to_string()))?;
        self.counters.get_ops.fetch_add(1, Ordering::SeqCst);

        let mut node = &*root;
        let mut wildcard_start = fields.len();
        for (depth, field) in fields.iter().enumerate() {
            if field.is_empty() {
                wildcard_start = depth;
                break;
            }
            match node.children.get(field) {
                Some(child) => node = child,
                None => return Ok(Vec::new()),
            }
        }

        if wildcard_start == fields.len() {
            // fully specified: at most the exact item
            if node.item.value == NO_VALUE {
                return Ok(Vec::new());
            }
            return Ok(vec![node.item.clone()]);
        }

        let mut items = Vec::new();
        collect(node, &mut items);

        let filters: Vec<usize> = (wildcard_start..fields.len())
            .filter(|&depth| !fields[depth].is_empty())
            .collect();
        if !filters.is_empty() {
            items.retain(|item| {
                filters
                    .iter()
                    .all(|&depth| item.fields.get(depth) == Some(&fields[depth]))
            });
        }

        Ok(items)
    }

    /// Inserts a new item, persisting it before it becomes visible.
    ///
    /// Fails with `Exists` if the field-set already resolves, and with
    /// `Wildcard` if any field is empty.
    pub fn put(self: &Arc<Self>, fields: &[String], value: u32) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnlyStore);
        }
        if fields.is_empty() || fields.iter().any(|f| f.is_empty()) {
            return Err(Error::Wildcard);
        }

        match self.one(fields) {
            Ok(_) => return Err(Error::Exists(fields.join("/"))),
            Err(Error::ItemNotFound) => {}
            Err(e) => return Err(e),
        }

        let item = Item {
            fields: fields.to_vec(),
            value,
        };
        let payload = item.encode();
        self.save_and_add(item, &payload)?;

        self.counters.put_ops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Returns a metrics snapshot, resetting the operation counters.
    pub fn metrics(&self) -> IndexMetrics {
        IndexMetrics {
            nodes: self.counters.nodes.load(Ordering::SeqCst),
            items: self.counters.items.load(Ordering::SeqCst),
            put_ops: self.counters.put_ops.swap(0, Ordering::SeqCst),
            get_ops: self.counters.get_ops.swap(0, Ordering::SeqCst),
            one_ops: self.counters.one_ops.swap(0, Ordering::SeqCst),
            data_size: self.data_size.load(Ordering::SeqCst),
            mmap_size: self.mmap_size.load(Ordering::SeqCst),
        }
    }

    /// Flushes the mapped log to disk.
    pub fn sync(&self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        let guard = self.log.lock().map_err(|e| Error::Lock(e.to_string()))?;
        if let Some(state) = guard.as_ref() {
            state.map.flush()?;
        }
        Ok(())
    }

    /// Flushes and unmaps the log. Further puts fail with `ReadOnlyStore`.
    pub fn close(&self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        let mut guard = self.log.lock().map_err(|e| Error::Lock(e.to_string()))?;
        if let Some(state) = guard.take() {
            state.map.flush()?;
        }
        Ok(())
    }

    fn slack(&self) -> u64 {
        self.mmap_size
            .load(Ordering::SeqCst)
            .saturating_sub(self.data_size.load(Ordering::SeqCst))
    }

    /// Appends the record and inserts the item under the add lock, so the
    /// on-disk order always equals the in-memory insertion order.
    fn save_and_add(self: &Arc<Self>, item: Item, payload: &[u8]) -> Result<()> {
        let needed = RECORD_HEADER_SIZE + payload.len() as u64;

        // force a synchronous grow when the record cannot fit at all
        if self.slack() < needed {
            let _guard = self.alloc.lock().map_err(|e| Error::Lock(e.to_string()))?;
            if self.slack() < needed {
                self.grow_locked(PREALLOC_SIZE.max(needed))?;
            }
        }

        // schedule a background grow when slack runs low
        if self.slack().saturating_sub(needed) < PREALLOC_THRESHOLD
            && self
                .allocating
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            let index = Arc::clone(self);
            std::thread::spawn(move || index.preallocate_in_background());
        }

        let mut item_slot = Some(item);
        loop {
            {
                let mut guard = self.log.lock().map_err(|e| Error::Lock(e.to_string()))?;
                let state = guard.as_mut().ok_or(Error::ReadOnlyStore)?;
                if state.append(payload) {
                    self.data_size.store(state.data_size, Ordering::SeqCst);
                    let mut root = self.root.write().map_err(|e| Error::Lock(e.to_string()))?;
                    if let Some(item) = item_slot.take() {
                        insert(&mut root, item, &self.counters);
                    }
                    return Ok(());
                }
            }

            // lost the remaining space to concurrent writers; grow and retry
            let _guard = self.alloc.lock().map_err(|e| Error::Lock(e.to_string()))?;
            if self.slack() < needed {
                self.grow_locked(PREALLOC_SIZE.max(needed))?;
            }
        }
    }

    /// Grows the file and remaps it. The caller must hold the allocation
    /// lock; the add lock is taken only while the mapping is swapped.
    fn grow_locked(&self, grow_by: u64) -> Result<()> {
        let file = self.file.as_ref().ok_or(Error::ReadOnlyStore)?;
        let new_len = self.mmap_size.load(Ordering::SeqCst) + grow_by;
        file.set_len(new_len)?;

        // Safety: same justification as in `open`; the old mapping is
        // replaced under the add lock so no writer holds a stale view
        let map = unsafe { MmapMut::map_mut(file)? };

        let mut guard = self.log.lock().map_err(|e| Error::Lock(e.to_string()))?;
        let state = guard.as_mut().ok_or(Error::ReadOnlyStore)?;
        state.map = map;
        self.mmap_size.store(new_len, Ordering::SeqCst);
        Ok(())
    }

    /// Grows the map when slack is below the preallocation threshold.
    fn ensure_slack(&self) -> Result<()> {
        if self.slack() < PREALLOC_THRESHOLD {
            let _guard = self.alloc.lock().map_err(|e| Error::Lock(e.to_string()))?;
            if self.slack() < PREALLOC_THRESHOLD {
                self.grow_locked(PREALLOC_SIZE)?;
            }
        }
        Ok(())
    }

    fn preallocate_in_background(&self) {
        if let Err(err) = self.ensure_slack() {
            tracing::error!("background index preallocation failed: {}", err);
        }
        self.allocating.store(false, Ordering::SeqCst);
    }
}

/// Rebuilds the trie from a log buffer, returning the used byte count.
fn replay(data: &[u8], root: &mut Node, counters: &Counters) -> Result<u64> {
    let mut data_size = 0u64;
    for record in scan_records(data) {
        let (offset, payload) = record?;
        let item = Item::decode(payload).map_err(|e| {
            Error::CorruptLog(format!("undecodable item at offset {}: {}", offset, e))
        })?;
        if item.fields.is_empty() {
            return Err(Error::CorruptLog(format!(
                "item with no fields at offset {}",
                offset
            )));
        }
        data_size = offset as u64 + RECORD_HEADER_SIZE + payload.len() as u64;
        insert(root, item, counters);
    }
    Ok(data_size)
}

/// Inserts an item, creating missing intermediate nodes. An existing node
/// at the terminal depth has its value updated (intermediate promotion).
fn insert(root: &mut Node, item: Item, counters: &Counters) {
    let depth_count = item.fields.len();
    if depth_count == 0 {
        return;
    }

    let mut node = root;
    for depth in 0..depth_count - 1 {
        let field = item.fields[depth].clone();
        let prefix = &item.fields[..depth + 1];
        node = node.children.entry(field).or_insert_with(|| {
            counters.nodes.fetch_add(1, Ordering::SeqCst);
            Node {
                item: Item {
                    fields: prefix.to_vec(),
                    value: NO_VALUE,
                },
                children: HashMap::new(),
            }
        });
    }

    let leaf_field = item.fields[depth_count - 1].clone();
    match node.children.entry(leaf_field) {
        Entry::Occupied(mut entry) => {
            entry.get_mut().item.value = item.value;
        }
        Entry::Vacant(entry) => {
            counters.nodes.fetch_add(1, Ordering::SeqCst);
            entry.insert(Node {
                item,
                children: HashMap::new(),
            });
        }
    }
    counters.items.fetch_add(1, Ordering::SeqCst);
}

/// Collects every valued item in a subtree.
fn collect(node: &Node, out: &mut Vec<Item>) {
    if node.item.value != NO_VALUE {
        out.push(node.item.clone());
    }
    for child in node.children.values() {
        collect(child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fields(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    fn open_rw(path: &std::path::Path) -> Arc<Index> {
        Index::open(IndexOptions {
            path: path.to_path_buf(),
            read_only: false,
        })
        .unwrap()
    }

    #[test]
    fn test_put_and_one() {
        let dir = tempdir().unwrap();
        let index = open_rw(&dir.path().join("index"));

        index.put(&fields(&["host-a", "cpu"]), 0).unwrap();
        index.put(&fields(&["host-a", "mem"]), 1).unwrap();

        assert_eq!(index.one(&fields(&["host-a", "cpu"])).unwrap().value, 0);
        assert_eq!(index.one(&fields(&["host-a", "mem"])).unwrap().value, 1);
        assert!(matches!(
            index.one(&fields(&["host-b", "cpu"])),
            Err(Error::ItemNotFound)
        ));
    }

    #[test]
    fn test_put_duplicate_fails() {
        let dir = tempdir().unwrap();
        let index = open_rw(&dir.path().join("index"));

        index.put(&fields(&["a", "b"]), 7).unwrap();
        assert!(matches!(
            index.put(&fields(&["a", "b"]), 8),
            Err(Error::Exists(_))
        ));
        // the original value is untouched
        assert_eq!(index.one(&fields(&["a", "b"])).unwrap().value, 7);
    }

    #[test]
    fn test_wildcards_rejected_where_not_permitted() {
        let dir = tempdir().unwrap();
        let index = open_rw(&dir.path().join("index"));

        assert!(matches!(
            index.put(&fields(&["a", ""]), 0),
            Err(Error::Wildcard)
        ));
        assert!(matches!(index.put(&[], 0), Err(Error::Wildcard)));
        assert!(matches!(
            index.one(&fields(&["a", ""])),
            Err(Error::Wildcard)
        ));
    }

    #[test]
    fn test_one_on_intermediate_misses() {
        let dir = tempdir().unwrap();
        let index = open_rw(&dir.path().join("index"));

        index.put(&fields(&["a", "b", "c"]), 3).unwrap();
        assert!(matches!(
            index.one(&fields(&["a", "b"])),
            Err(Error::ItemNotFound)
        ));
    }

    #[test]
    fn test_intermediate_promotion() {
        let dir = tempdir().unwrap();
        let index = open_rw(&dir.path().join("index"));

        index.put(&fields(&["a", "b", "c"]), 3).unwrap();
        index.put(&fields(&["a", "b"]), 9).unwrap();

        assert_eq!(index.one(&fields(&["a", "b"])).unwrap().value, 9);
        assert_eq!(index.one(&fields(&["a", "b", "c"])).unwrap().value, 3);
    }

    #[test]
    fn test_get_wildcard_subtree() {
        let dir = tempdir().unwrap();
        let index = open_rw(&dir.path().join("index"));

        index.put(&fields(&["a", "x"]), 0).unwrap();
        index.put(&fields(&["a", "y"]), 1).unwrap();
        index.put(&fields(&["b", "x"]), 2).unwrap();

        let mut values: Vec<u32> = index
            .get(&fields(&["a", ""]))
            .unwrap()
            .iter()
            .map(|i| i.value)
            .collect();
        values.sort_unstable();
        assert_eq!(values, vec![0, 1]);
    }

    #[test]
    fn test_get_single_wildcard_matches_everything() {
        let dir = tempdir().unwrap();
        let index = open_rw(&dir.path().join("index"));

        index.put(&fields(&["a"]), 0).unwrap();
        index.put(&fields(&["a", "x"]), 1).unwrap();
        index.put(&fields(&["b", "y", "z"]), 2).unwrap();

        assert_eq!(index.get(&fields(&[""])).unwrap().len(), 3);
    }

    #[test]
    fn test_get_post_filter() {
        let dir = tempdir().unwrap();
        let index = open_rw(&dir.path().join("index"));

        index.put(&fields(&["a", "x", "1"]), 0).unwrap();
        index.put(&fields(&["a", "y", "1"]), 1).unwrap();
        index.put(&fields(&["a", "y", "2"]), 2).unwrap();
        // arity shorter than the post-filter depth: must be excluded
        index.put(&fields(&["a", "y"]), 3).unwrap();

        let mut values: Vec<u32> = index
            .get(&fields(&["a", "", "1"]))
            .unwrap()
            .iter()
            .map(|i| i.value)
            .collect();
        values.sort_unstable();
        assert_eq!(values, vec![0, 1]);
    }

    #[test]
    fn test_get_exact_prefix_equals_one() {
        let dir = tempdir().unwrap();
        let index = open_rw(&dir.path().join("index"));

        index.put(&fields(&["a", "x"]), 0).unwrap();
        index.put(&fields(&["a", "x", "deep"]), 1).unwrap();

        // non-wildcard get returns exactly the item `one` would return
        let items = index.get(&fields(&["a", "x"])).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].value, 0);

        // and nothing when `one` would miss
        assert!(index.get(&fields(&["a", "missing"])).unwrap().is_empty());
        assert!(index.get(&fields(&["a"])).unwrap().is_empty());
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index");

        {
            let index = open_rw(&path);
            index.put(&fields(&["host-a", "cpu"]), 42).unwrap();
            index.put(&fields(&["host-b", "cpu"]), 43).unwrap();
            index.close().unwrap();
        }

        {
            let index = open_rw(&path);
            assert_eq!(index.one(&fields(&["host-a", "cpu"])).unwrap().value, 42);
            assert_eq!(index.one(&fields(&["host-b", "cpu"])).unwrap().value, 43);
        }
    }

    #[test]
    fn test_read_only_index() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index");

        {
            let index = open_rw(&path);
            index.put(&fields(&["a", "b"]), 1).unwrap();
            index.close().unwrap();
        }

        let index = Index::open(IndexOptions {
            path,
            read_only: true,
        })
        .unwrap();

        assert_eq!(index.one(&fields(&["a", "b"])).unwrap().value, 1);
        assert!(matches!(
            index.put(&fields(&["c", "d"]), 2),
            Err(Error::ReadOnlyStore)
        ));
        // read-only indexes release the map after replay
        assert_eq!(index.metrics().mmap_size, 0);
    }

    #[test]
    fn test_log_parses_back_to_same_items() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index");

        let written = vec![
            (fields(&["a", "x"]), 0u32),
            (fields(&["a", "y"]), 1),
            (fields(&["b"]), 2),
        ];

        {
            let index = open_rw(&path);
            for (f, v) in &written {
                index.put(f, *v).unwrap();
            }
            index.close().unwrap();
        }

        let data = std::fs::read(&path).unwrap();
        let parsed: Vec<Item> = scan_records(&data)
            .map(|r| r.and_then(|(_, payload)| Item::decode(payload)))
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(parsed.len(), written.len());
        for ((f, v), item) in written.iter().zip(&parsed) {
            assert_eq!(&item.fields, f);
            assert_eq!(item.value, *v);
        }
    }

    #[test]
    fn test_file_preallocated_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index");
        let _index = open_rw(&path);

        assert_eq!(
            std::fs::metadata(&path).unwrap().len(),
            PREALLOC_SIZE,
            "fresh log is preallocated with zeros"
        );
    }

    #[test]
    fn test_corrupt_log_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index");

        // a record claiming far more bytes than the file holds
        let mut data = Vec::new();
        data.extend_from_slice(&4096u32.to_le_bytes());
        data.extend_from_slice(&[0xAB; 16]);
        std::fs::write(&path, &data).unwrap();

        let err = Index::open(IndexOptions {
            path,
            read_only: false,
        })
        .unwrap_err();
        assert!(matches!(err, Error::CorruptLog(_)));
    }

    #[test]
    fn test_metrics_reset_operation_counters() {
        let dir = tempdir().unwrap();
        let index = open_rw(&dir.path().join("index"));

        index.put(&fields(&["a", "b"]), 0).unwrap();
        index.one(&fields(&["a", "b"])).unwrap();
        index.get(&fields(&[""])).unwrap();

        let metrics = index.metrics();
        assert_eq!(metrics.items, 1);
        assert_eq!(metrics.nodes, 2);
        assert_eq!(metrics.put_ops, 1);
        // put's internal probe misses and is not counted
        assert_eq!(metrics.one_ops, 1);
        assert_eq!(metrics.get_ops, 1);
        assert!(metrics.data_size > 0);

        let metrics = index.metrics();
        assert_eq!(metrics.put_ops, 0);
        assert_eq!(metrics.get_ops, 0);
        assert_eq!(metrics.one_ops, 0);
        assert_eq!(metrics.items, 1);
    }

    #[test]
    fn test_put_after_close_fails() {
        let dir = tempdir().unwrap();
        let index = open_rw(&dir.path().join("index"));

        index.put(&fields(&["a"]), 0).unwrap();
        index.close().unwrap();
        assert!(matches!(
            index.put(&fields(&["b"]), 1),
            Err(Error::ReadOnlyStore)
        ));
    }
}
