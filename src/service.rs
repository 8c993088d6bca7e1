//! Request dispatch service
//!
//! Executes decoded request batches against a set of named open
//! databases and produces the matching response batches. The network
//! loop that frames bytes on and off a socket lives outside this crate;
//! this layer is the glue between the wire messages and the engine.
//!
//! Per request, the first set variant in field-number order wins: track,
//! then fetch, then sync. Failures become `Response { error }` with the
//! text of the engine error; the batch itself always succeeds.

use crate::database::Database;
use crate::error::Result;
use crate::protocol::{
    Chunk, FetchReq, FetchRes, Request, RequestBatch, Response, ResponseBatch, SyncRes, TrackReq,
    TrackRes,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Byte length of a track payload: total (f64) followed by count (u64).
pub const TRACK_PAYLOAD_SIZE: u32 = 16;

/// Dispatches request batches to named databases.
#[derive(Default)]
pub struct Service {
    databases: HashMap<String, Arc<Database>>,
}

impl Service {
    /// Creates an empty service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a database under a name.
    pub fn add_database(&mut self, name: impl Into<String>, database: Arc<Database>) {
        self.databases.insert(name.into(), database);
    }

    /// Looks up a registered database.
    pub fn database(&self, name: &str) -> Option<&Arc<Database>> {
        self.databases.get(name)
    }

    /// Executes a request batch, answering every request in order and
    /// echoing the correlation id.
    pub async fn handle(&self, batch: RequestBatch) -> ResponseBatch {
        let mut responses = Vec::with_capacity(batch.batch.len());
        for request in batch.batch {
            responses.push(self.dispatch(request).await);
        }
        ResponseBatch {
            id: batch.id,
            batch: responses,
        }
    }

    async fn dispatch(&self, request: Request) -> Response {
        let Some(database) = self.databases.get(&request.database) else {
            return Response {
                error: format!("unknown database: {}", request.database),
                ..Default::default()
            };
        };

        if let Some(track) = request.track {
            match self.track(database, track).await {
                Ok(res) => Response {
                    track: Some(res),
                    ..Default::default()
                },
                Err(err) => Response {
                    error: err.to_string(),
                    ..Default::default()
                },
            }
        } else if let Some(fetch) = request.fetch {
            match self.fetch(database, fetch).await {
                Ok(res) => Response {
                    fetch: Some(res),
                    ..Default::default()
                },
                Err(err) => Response {
                    error: err.to_string(),
                    ..Default::default()
                },
            }
        } else if request.sync.is_some() {
            match database.sync().await {
                Ok(()) => Response {
                    sync: Some(SyncRes),
                    ..Default::default()
                },
                Err(err) => Response {
                    error: err.to_string(),
                    ..Default::default()
                },
            }
        } else {
            Response {
                error: "request carries no operation".to_string(),
                ..Default::default()
            }
        }
    }

    async fn track(&self, database: &Arc<Database>, req: TrackReq) -> Result<TrackRes> {
        let mut payload = Vec::with_capacity(TRACK_PAYLOAD_SIZE as usize);
        payload.extend_from_slice(&req.total.to_le_bytes());
        payload.extend_from_slice(&req.count.to_le_bytes());

        database.put(req.time as i64, &req.fields, &payload).await?;
        Ok(TrackRes)
    }

    async fn fetch(&self, database: &Arc<Database>, req: FetchReq) -> Result<FetchRes> {
        let sets = database
            .get(req.from as i64, req.to as i64, &req.fields)
            .await?;

        let chunks = sets
            .into_iter()
            .map(|(item, points)| Chunk {
                fields: item.fields,
                points,
            })
            .collect();

        Ok(FetchRes { chunks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Options;
    use crate::protocol::{Message, SyncReq};
    use tempfile::tempdir;

    const RES: i64 = 1_000_000_000;
    const DUR: i64 = 10_000_000_000;

    async fn service_with_db(dir: &std::path::Path) -> Service {
        let db = Database::new(Options {
            path: dir.join("db"),
            resolution: RES,
            retention: 4_000_000_000_000_000_000,
            duration: DUR,
            payload_size: TRACK_PAYLOAD_SIZE,
            segment_size: 100,
            max_ro_epochs: 4,
            max_rw_epochs: 4,
            recovery: true,
        })
        .await
        .unwrap();

        let mut service = Service::new();
        service.add_database("db", db);
        service
    }

    fn track_request(time: u64, total: f64, count: u64, fields: &[&str]) -> Request {
        Request {
            database: "db".to_string(),
            track: Some(TrackReq {
                time,
                total,
                count,
                fields: fields.iter().map(|s| s.to_string()).collect(),
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_batched_track_and_fetch() {
        // S5: a batch round-trips through the codec and the engine
        let dir = tempdir().unwrap();
        let service = service_with_db(dir.path()).await;

        let track = service
            .handle(RequestBatch {
                id: 7,
                batch: vec![track_request(3 * RES as u64, 42.5, 3, &["a"])],
            })
            .await;
        assert_eq!(track.id, 7);
        assert!(track.batch[0].error.is_empty());
        assert!(track.batch[0].track.is_some());

        let batch = RequestBatch {
            id: 42,
            batch: vec![Request {
                database: "db".to_string(),
                fetch: Some(FetchReq {
                    from: 0,
                    to: DUR as u64,
                    fields: vec!["a".to_string()],
                }),
                ..Default::default()
            }],
        };

        // through the wire format, as a server loop would
        let decoded = RequestBatch::decode(&batch.encode()).unwrap();
        let response = service.handle(decoded).await;
        let bytes = response.encode();
        let response = ResponseBatch::decode(&bytes).unwrap();

        assert_eq!(response.id, 42);
        assert_eq!(response.batch.len(), 1);
        assert!(response.batch[0].error.is_empty());

        let fetch = response.batch[0].fetch.as_ref().unwrap();
        assert_eq!(fetch.chunks.len(), 1);
        assert_eq!(fetch.chunks[0].fields, vec!["a".to_string()]);
        assert_eq!(fetch.chunks[0].points.len(), 10);

        let mut expected = Vec::new();
        expected.extend_from_slice(&42.5f64.to_le_bytes());
        expected.extend_from_slice(&3u64.to_le_bytes());
        assert_eq!(fetch.chunks[0].points[3], expected);
        assert_eq!(fetch.chunks[0].points[0], vec![0u8; 16]);
    }

    #[tokio::test]
    async fn test_unknown_database() {
        let dir = tempdir().unwrap();
        let service = service_with_db(dir.path()).await;

        let response = service
            .handle(RequestBatch {
                id: 1,
                batch: vec![Request {
                    database: "nope".to_string(),
                    sync: Some(SyncReq),
                    ..Default::default()
                }],
            })
            .await;

        assert_eq!(response.batch[0].error, "unknown database: nope");
    }

    #[tokio::test]
    async fn test_engine_errors_become_response_errors() {
        let dir = tempdir().unwrap();
        let service = service_with_db(dir.path()).await;

        // fetch with an inverted range
        let response = service
            .handle(RequestBatch {
                id: 2,
                batch: vec![Request {
                    database: "db".to_string(),
                    fetch: Some(FetchReq {
                        from: DUR as u64,
                        to: 0,
                        fields: vec!["a".to_string()],
                    }),
                    ..Default::default()
                }],
            })
            .await;

        assert!(!response.batch[0].error.is_empty());
        assert!(response.batch[0].fetch.is_none());
    }

    #[tokio::test]
    async fn test_empty_request() {
        let dir = tempdir().unwrap();
        let service = service_with_db(dir.path()).await;

        let response = service
            .handle(RequestBatch {
                id: 3,
                batch: vec![Request {
                    database: "db".to_string(),
                    ..Default::default()
                }],
            })
            .await;

        assert_eq!(response.batch[0].error, "request carries no operation");
    }

    #[tokio::test]
    async fn test_sync_request() {
        let dir = tempdir().unwrap();
        let service = service_with_db(dir.path()).await;

        service
            .handle(RequestBatch {
                id: 4,
                batch: vec![track_request(0, 1.0, 1, &["a"])],
            })
            .await;

        let response = service
            .handle(RequestBatch {
                id: 5,
                batch: vec![Request {
                    database: "db".to_string(),
                    sync: Some(SyncReq),
                    ..Default::default()
                }],
            })
            .await;

        assert!(response.batch[0].error.is_empty());
        assert!(response.batch[0].sync.is_some());
    }

    #[tokio::test]
    async fn test_first_variant_wins() {
        // a request with both track and fetch set: track is processed
        let dir = tempdir().unwrap();
        let service = service_with_db(dir.path()).await;

        let mut request = track_request(0, 9.0, 1, &["both"]);
        request.fetch = Some(FetchReq {
            from: 0,
            to: DUR as u64,
            fields: vec!["both".to_string()],
        });

        let response = service
            .handle(RequestBatch {
                id: 6,
                batch: vec![request],
            })
            .await;

        assert!(response.batch[0].error.is_empty());
        assert!(response.batch[0].track.is_some());
        assert!(response.batch[0].fetch.is_none());
    }
}
