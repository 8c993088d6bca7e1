//! # epochdb
//!
//! An epoch-partitioned time-series storage engine for fixed-size
//! payloads, queryable by ordered string field-sets with wildcard
//! support.
//!
//! ## Features
//!
//! - **Epoch partitioning**: time is split into fixed-duration epochs,
//!   each stored in its own directory and opened lazily through
//!   read-only / read-write LRU caches
//! - **Persistent field index**: a trie over field tuples backed by a
//!   memory-mapped append-only log with background preallocation
//! - **Fixed-size payloads**: each point is an opaque byte payload
//!   written in place, so unwritten points read back as zeros
//! - **Retention**: a background task removes epochs older than the
//!   configured retention window
//! - **Wire protocol**: varint-tagged, length-delimited batch encoding
//!   for track / fetch / sync requests
//!
//! ## Modules
//!
//! - [`database`]: the orchestrator tying everything together
//! - [`epoch`]: one epoch's index + block store façade
//! - [`index`]: the persistent field-set trie
//! - [`block`]: the fixed-geometry payload store
//! - [`cache`]: the LRU epoch cache
//! - [`protocol`]: the wire codec
//! - [`service`]: request batch dispatch
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use epochdb::{Database, Options};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::new(Options {
//!         path: "./data/metrics".into(),
//!         resolution: 1_000_000_000,          // one point per second
//!         retention: 7 * 86_400_000_000_000,  // keep a week
//!         duration: 3_600_000_000_000,        // one epoch per hour
//!         payload_size: 16,
//!         segment_size: 1000,
//!         max_ro_epochs: 4,
//!         max_rw_epochs: 2,
//!         recovery: false,
//!     })
//!     .await?;
//!
//!     let fields = vec!["host-a".to_string(), "cpu".to_string()];
//!     db.put(1_700_000_000_000_000_000, &fields, &[1u8; 16]).await?;
//!
//!     // exact series over a half-open range
//!     let points = db
//!         .one(1_700_000_000_000_000_000, 1_700_000_060_000_000_000, &fields)
//!         .await?;
//!     println!("read {} points", points.len());
//!
//!     // wildcard: every series under host-a
//!     let all = db
//!         .get(
//!             1_700_000_000_000_000_000,
//!             1_700_000_060_000_000_000,
//!             &vec!["host-a".to_string(), String::new()],
//!         )
//!         .await?;
//!     println!("matched {} series", all.len());
//!
//!     db.close().await?;
//!     Ok(())
//! }
//! ```

pub mod block;
pub mod cache;
pub mod database;
pub mod epoch;
pub mod error;
pub mod index;
pub mod protocol;
pub mod service;

// Re-export top-level types for convenience
pub use block::{BlockOptions, BlockStore};
pub use cache::Cache;
pub use database::{Database, DatabaseMetrics, Metadata, Options};
pub use epoch::{Epoch, EpochOptions};
pub use error::{Error, Result};
pub use index::{Index, IndexMetrics, IndexOptions, Item, NO_VALUE};
pub use protocol::{
    Chunk, FetchReq, FetchRes, Message, Request, RequestBatch, Response, ResponseBatch, SyncReq,
    SyncRes, TrackReq, TrackRes,
};
pub use service::Service;
