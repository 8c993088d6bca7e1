//! Database orchestrator
//!
//! Partitions time into fixed-duration epochs and routes writes and range
//! reads to lazily opened epoch handles held in two LRU caches: recent
//! epochs are opened read-write, older ones read-only. A background task
//! enforces the retention policy by deleting expired epoch directories.
//!
//! Timestamp arithmetic is integer division throughout: inputs are
//! floored to the resolution, epochs are identified by
//! `ts - ts % duration`, and a point's intra-epoch position is
//! `(ts - epoch_ts) / resolution`.
//!
//! # Example
//!
//! ```rust,no_run
//! use epochdb::{Database, Options};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::new(Options {
//!         path: "./data/metrics".into(),
//!         resolution: 1_000_000_000,
//!         retention: 86_400_000_000_000,
//!         duration: 3_600_000_000_000,
//!         payload_size: 16,
//!         segment_size: 1000,
//!         max_ro_epochs: 4,
//!         max_rw_epochs: 2,
//!         recovery: false,
//!     })
//!     .await?;
//!
//!     let fields = vec!["host-a".to_string(), "cpu".to_string()];
//!     db.put(1_700_000_000_000_000_000, &fields, &[0u8; 16]).await?;
//!
//!     db.close().await?;
//!     Ok(())
//! }
//! ```

mod metadata;

pub use metadata::{Metadata, MetadataStore};

use crate::cache::Cache;
use crate::epoch::{Epoch, EpochOptions};
use crate::error::{Error, Result};
use crate::index::{IndexMetrics, Item};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex as AsyncMutex, RwLock as AsyncRwLock};
use tokio::time::{interval, Duration};

/// Prefix of epoch directory names, e.g. `epoch_1700000000000000000`.
pub const EPOCH_PREFIX: &str = "epoch_";

/// Name of the metadata file inside the database directory.
pub const METADATA_FILE: &str = "metadata";

/// Interval between retention checks.
const RETENTION_INTERVAL: Duration = Duration::from_secs(60);

/// Parameters for creating a [`Database`].
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory to store epochs in
    pub path: PathBuf,
    /// Nanoseconds represented by one point
    pub resolution: i64,
    /// Nanoseconds before data is purged
    pub retention: i64,
    /// Nanoseconds covered by one epoch; must be a multiple of resolution
    pub duration: i64,
    /// Bytes per payload
    pub payload_size: u32,
    /// Rows per block store segment
    pub segment_size: u32,
    /// Capacity of the read-only epoch cache
    pub max_ro_epochs: u32,
    /// Capacity of the read-write epoch cache
    pub max_rw_epochs: u32,
    /// Open every epoch read-write regardless of age
    pub recovery: bool,
}

/// Per-epoch metrics for the resident entries of both caches.
#[derive(Debug, Clone, Default)]
pub struct DatabaseMetrics {
    /// Metrics of resident read-only epochs, keyed by epoch timestamp
    pub ro_epochs: HashMap<i64, IndexMetrics>,
    /// Metrics of resident read-write epochs, keyed by epoch timestamp
    pub rw_epochs: HashMap<i64, IndexMetrics>,
}

/// A time-series database storing fixed-size payloads per field-set.
pub struct Database {
    metadata: Mutex<Metadata>,
    mdstore: MetadataStore,
    ro_epochs: Cache<Arc<Epoch>>,
    rw_epochs: Cache<Arc<Epoch>>,
    /// Serializes the epoch-open path so a miss is constructed once.
    admit: AsyncMutex<()>,
    recovery: bool,
    shutdown: AsyncRwLock<bool>,
}

impl Database {
    /// Creates a new database at `options.path` and starts retention.
    ///
    /// Fails with `Exists` when the path is already present.
    pub async fn new(options: Options) -> Result<Arc<Self>> {
        let metadata = Metadata {
            path: options.path.clone(),
            resolution: options.resolution,
            retention: options.retention,
            duration: options.duration,
            payload_size: options.payload_size,
            segment_size: options.segment_size,
            max_ro_epochs: options.max_ro_epochs,
            max_rw_epochs: options.max_rw_epochs,
        };
        metadata.validate()?;

        if options.path.exists() {
            return Err(Error::Exists(options.path.display().to_string()));
        }
        std::fs::create_dir_all(&options.path)?;

        let mdstore = MetadataStore::new(options.path.join(METADATA_FILE));
        mdstore.save(&metadata)?;

        tracing::info!("created database at {:?}", options.path);
        Ok(Self::start(metadata, mdstore, options.recovery))
    }

    /// Opens an existing database and starts retention.
    ///
    /// With `recovery` set, every epoch is opened read-write regardless
    /// of age.
    pub async fn open(path: PathBuf, recovery: bool) -> Result<Arc<Self>> {
        let mdstore = MetadataStore::new(path.join(METADATA_FILE));
        let metadata = mdstore.load()?;
        metadata.validate()?;

        tracing::info!("opened database at {:?}", path);
        Ok(Self::start(metadata, mdstore, recovery))
    }

    fn start(metadata: Metadata, mdstore: MetadataStore, recovery: bool) -> Arc<Self> {
        // eviction closes the epoch; the cache invokes this outside its lock
        fn close_evicted(ts: i64, epoch: Arc<Epoch>) {
            if let Err(err) = epoch.close() {
                tracing::error!("failed to close evicted epoch {}: {}", ts, err);
            }
        }

        let database = Arc::new(Database {
            ro_epochs: Cache::new(metadata.max_ro_epochs as usize, Box::new(close_evicted)),
            rw_epochs: Cache::new(metadata.max_rw_epochs as usize, Box::new(close_evicted)),
            metadata: Mutex::new(metadata),
            mdstore,
            admit: AsyncMutex::new(()),
            recovery,
            shutdown: AsyncRwLock::new(false),
        });

        let _retention = database.start_retention();
        database
    }

    /// Returns a snapshot of the metadata record.
    pub fn info(&self) -> Result<Metadata> {
        Ok(self
            .metadata
            .lock()
            .map_err(|e| Error::Lock(e.to_string()))?
            .clone())
    }

    /// Updates the runtime-mutable metadata fields (the cache
    /// capacities), resizing the caches and re-persisting the record.
    pub async fn edit(
        &self,
        max_ro_epochs: Option<u32>,
        max_rw_epochs: Option<u32>,
    ) -> Result<()> {
        let updated = {
            let mut md = self
                .metadata
                .lock()
                .map_err(|e| Error::Lock(e.to_string()))?;
            if let Some(capacity) = max_ro_epochs {
                if capacity == 0 {
                    return Err(Error::Config(
                        "epoch cache capacities must be positive".to_string(),
                    ));
                }
                md.max_ro_epochs = capacity;
            }
            if let Some(capacity) = max_rw_epochs {
                if capacity == 0 {
                    return Err(Error::Config(
                        "epoch cache capacities must be positive".to_string(),
                    ));
                }
                md.max_rw_epochs = capacity;
            }
            md.clone()
        };

        self.ro_epochs.resize(updated.max_ro_epochs as usize);
        self.rw_epochs.resize(updated.max_rw_epochs as usize);
        self.mdstore.save(&updated)
    }

    /// Stores one payload for a timestamp and field-set.
    pub async fn put(&self, ts: i64, fields: &[String], payload: &[u8]) -> Result<()> {
        let md = self.info()?;

        // floor to a point start time
        let ts = ts - ts % md.resolution;

        let epoch = self.epoch(ts).await?;
        let epoch_ts = ts - ts % md.duration;
        let pos = ((ts - epoch_ts) / md.resolution) as u32;

        epoch.put(pos, fields, payload)
    }

    /// Reads the series of one exact field-set over `[start, end)`.
    ///
    /// Positions never written come back as all-zero payloads; an epoch
    /// that fails to open or query leaves its slice zeroed.
    pub async fn one(&self, start: i64, end: i64, fields: &[String]) -> Result<Vec<Vec<u8>>> {
        let md = self.info()?;

        let start = start - start % md.resolution;
        let end = end - end % md.resolution;
        if end <= start {
            return Err(Error::InvalidRange);
        }

        let pcount = ((end - start) / md.resolution) as usize;
        let mut out = vec![vec![0u8; md.payload_size as usize]; pcount];

        for window in EpochWindows::new(start, end, md.duration) {
            let epoch = match self.epoch(window.epoch_ts).await {
                Ok(epoch) => epoch,
                Err(err) => {
                    tracing::debug!("skipping epoch {}: {}", window.epoch_ts, err);
                    continue;
                }
            };

            let (start_pos, end_pos) = window.positions(md.resolution, md.duration);
            let result = match epoch.one(start_pos, end_pos, fields) {
                Ok(result) => result,
                Err(err) => {
                    tracing::debug!("skipping epoch {}: {}", window.epoch_ts, err);
                    continue;
                }
            };

            let (rec_start, _) = window.output_range(start, md.resolution);
            for (i, payload) in result.into_iter().enumerate() {
                out[rec_start + i] = payload;
            }
        }

        Ok(out)
    }

    /// Reads every series matching a wildcard field-set query over
    /// `[start, end)`.
    ///
    /// Results are keyed by the field tuple; the item of the first
    /// contributing epoch is the canonical one. Every matched series
    /// spans the full window, with unwritten slices zero-filled.
    pub async fn get(
        &self,
        start: i64,
        end: i64,
        fields: &[String],
    ) -> Result<Vec<(Item, Vec<Vec<u8>>)>> {
        let md = self.info()?;

        let start = start - start % md.resolution;
        let end = end - end % md.resolution;
        if end <= start {
            return Err(Error::InvalidRange);
        }

        let pcount = ((end - start) / md.resolution) as usize;
        let payload_size = md.payload_size as usize;

        // accumulators are keyed by the field tuple itself: joining the
        // fields into a string would alias distinct tuples
        let mut sets: HashMap<Vec<String>, (Item, Vec<Vec<u8>>)> = HashMap::new();

        for window in EpochWindows::new(start, end, md.duration) {
            let epoch = match self.epoch(window.epoch_ts).await {
                Ok(epoch) => epoch,
                Err(err) => {
                    tracing::debug!("skipping epoch {}: {}", window.epoch_ts, err);
                    continue;
                }
            };

            let (start_pos, end_pos) = window.positions(md.resolution, md.duration);
            let result = match epoch.get(start_pos, end_pos, fields) {
                Ok(result) => result,
                Err(err) => {
                    tracing::debug!("skipping epoch {}: {}", window.epoch_ts, err);
                    continue;
                }
            };

            let (rec_start, _) = window.output_range(start, md.resolution);
            for (item, points) in result {
                let entry = sets.entry(item.fields.clone()).or_insert_with(|| {
                    (item, vec![vec![0u8; payload_size]; pcount])
                });
                for (i, payload) in points.into_iter().enumerate() {
                    entry.1[rec_start + i] = payload;
                }
            }
        }

        Ok(sets.into_values().collect())
    }

    /// Flushes every resident read-write epoch to disk.
    pub async fn sync(&self) -> Result<()> {
        for (ts, epoch) in self.rw_epochs.entries() {
            if let Err(err) = epoch.sync() {
                tracing::error!("failed to sync epoch {}: {}", ts, err);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Per-epoch metrics for every resident epoch.
    pub fn metrics(&self) -> DatabaseMetrics {
        DatabaseMetrics {
            ro_epochs: self
                .ro_epochs
                .entries()
                .into_iter()
                .map(|(ts, epoch)| (ts, epoch.metrics()))
                .collect(),
            rw_epochs: self
                .rw_epochs
                .entries()
                .into_iter()
                .map(|(ts, epoch)| (ts, epoch.metrics()))
                .collect(),
        }
    }

    /// Closes every resident epoch and stops the retention task.
    pub async fn close(&self) -> Result<()> {
        self.ro_epochs.purge();
        self.rw_epochs.purge();
        *self.shutdown.write().await = true;
        Ok(())
    }

    /// Loads the epoch containing `ts`, from cache when possible.
    ///
    /// Epochs newer than `now + duration` are refused as `Future`;
    /// epochs older than the read-write window are opened read-only,
    /// unless recovery mode forces everything read-write.
    async fn epoch(&self, ts: i64) -> Result<Arc<Epoch>> {
        let md = self.info()?;

        // floor to an epoch start time
        let ts = ts - ts % md.duration;

        let now = now_nanos()?;
        let now = now - now % md.duration;
        let min = now - i64::from(md.max_rw_epochs - 1) * md.duration;
        let max = now + md.duration;

        if ts >= max {
            return Err(Error::FutureTimestamp);
        }

        // the present epoch counts toward the read-write window
        let read_only = ts < min && !self.recovery;

        let cache = if read_only {
            &self.ro_epochs
        } else {
            &self.rw_epochs
        };

        if let Some(epoch) = cache.get(ts) {
            return Ok(epoch);
        }

        let _admission = self.admit.lock().await;
        if let Some(epoch) = cache.get(ts) {
            return Ok(epoch);
        }

        // a just-rolled-over epoch may still be resident read-write; it
        // must not be opened read-only while that handle lives
        if read_only {
            if let Some(epoch) = self.rw_epochs.get(ts) {
                return Ok(epoch);
            }
        }

        let epoch = Arc::new(Epoch::open(&EpochOptions {
            path: md.path.join(format!("{}{}", EPOCH_PREFIX, ts)),
            payload_size: md.payload_size,
            row_len: md.points_per_epoch(),
            segment_size: md.segment_size,
            read_only,
        })?);

        cache.add(ts, Arc::clone(&epoch));
        Ok(epoch)
    }

    /// Starts the background retention task, ticking once per minute
    /// until close is signaled.
    fn start_retention(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let database = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = interval(RETENTION_INTERVAL);

            loop {
                ticker.tick().await;

                if *database.shutdown.read().await {
                    break;
                }

                match database.expire() {
                    Ok(0) => {}
                    Ok(removed) => tracing::info!("expired {} epochs", removed),
                    Err(err) => tracing::error!("retention check failed: {}", err),
                }
            }
        })
    }

    /// Deletes every epoch directory older than the retention cutoff.
    ///
    /// Read-only cache entries are removed and closed first; resident
    /// read-write epochs are never touched. Errors on a single epoch are
    /// logged and the scan continues.
    fn expire(&self) -> Result<usize> {
        let md = self.info()?;

        let mut cutoff = now_nanos()? - md.retention;
        cutoff -= cutoff % md.duration;

        let entries = match std::fs::read_dir(&md.path) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }

            let name = entry.file_name();
            let Some(suffix) = name.to_str().and_then(|n| n.strip_prefix(EPOCH_PREFIX)) else {
                continue;
            };
            let Ok(ts) = suffix.parse::<i64>() else {
                tracing::warn!("ignoring epoch directory with bad name: {:?}", name);
                continue;
            };

            if ts > cutoff {
                continue;
            }

            // deleting a live writable epoch is unsafe; anything this old
            // only reaches the read-write cache through recovery mode
            if self.rw_epochs.contains(ts) {
                continue;
            }

            if let Some(epoch) = self.ro_epochs.del(ts) {
                if let Err(err) = epoch.close() {
                    tracing::error!("failed to close expired epoch {}: {}", ts, err);
                    continue;
                }
            }

            if let Err(err) = std::fs::remove_dir_all(entry.path()) {
                tracing::error!("failed to remove expired epoch {}: {}", ts, err);
                continue;
            }

            removed += 1;
        }

        Ok(removed)
    }
}

/// One epoch's contribution to a range read: the epoch timestamp and the
/// trimmed `[trm_start, trm_end)` window it covers.
struct EpochWindow {
    epoch_ts: i64,
    trm_start: i64,
    trm_end: i64,
}

impl EpochWindow {
    /// Intra-epoch position range.
    fn positions(&self, resolution: i64, duration: i64) -> (u32, u32) {
        let start_pos = ((self.trm_start % duration) / resolution) as u32;
        let end_pos = start_pos + ((self.trm_end - self.trm_start) / resolution) as u32;
        (start_pos, end_pos)
    }

    /// Index range in the request's output buffer.
    fn output_range(&self, start: i64, resolution: i64) -> (usize, usize) {
        (
            ((self.trm_start - start) / resolution) as usize,
            ((self.trm_end - start) / resolution) as usize,
        )
    }
}

/// Iterates the epochs intersecting `[start, end)` with their trimmed
/// windows.
struct EpochWindows {
    start: i64,
    end: i64,
    duration: i64,
    epoch_first: i64,
    epoch_last: i64,
    next_ts: i64,
}

impl EpochWindows {
    fn new(start: i64, end: i64, duration: i64) -> Self {
        let epoch_first = start - start % duration;
        let epoch_last = end - end % duration;
        EpochWindows {
            start,
            end,
            duration,
            epoch_first,
            epoch_last,
            next_ts: epoch_first,
        }
    }
}

impl Iterator for EpochWindows {
    type Item = EpochWindow;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_ts > self.epoch_last {
            return None;
        }
        let ts = self.next_ts;
        self.next_ts += self.duration;

        Some(EpochWindow {
            epoch_ts: ts,
            trm_start: if ts == self.epoch_first { self.start } else { ts },
            trm_end: if ts == self.epoch_last {
                self.end
            } else {
                ts + self.duration
            },
        })
    }
}

/// Current wall-clock time in nanoseconds since the unix epoch.
fn now_nanos() -> Result<i64> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::Clock(e.to_string()))?;
    Ok(now.as_nanos() as i64)
}
