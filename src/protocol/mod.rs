//! Wire protocol codec
//!
//! Length-delimited, varint-tagged binary encoding for the request /
//! response batch format and for on-disk index items. The rules match the
//! usual protobuf conventions:
//!
//! - field tag byte = `(field_number << 3) | wire_type`
//! - wire types: 0 = varint, 1 = 64-bit fixed, 2 = length-delimited
//! - zero-valued scalar fields are omitted on the wire
//! - unknown tags are skipped, preserving forward compatibility
//! - sub-message lengths are bounded by the enclosing buffer
//!
//! # Example
//!
//! ```rust
//! use epochdb::protocol::{FetchReq, Message, Request, RequestBatch};
//!
//! let batch = RequestBatch {
//!     id: 42,
//!     batch: vec![Request {
//!         database: "metrics".to_string(),
//!         fetch: Some(FetchReq {
//!             from: 0,
//!             to: 10_000_000_000,
//!             fields: vec!["host-a".to_string()],
//!         }),
//!         ..Default::default()
//!     }],
//! };
//!
//! let bytes = batch.encode();
//! let decoded = RequestBatch::decode(&bytes).unwrap();
//! assert_eq!(decoded, batch);
//! ```

pub mod wire;

use crate::error::Result;
use bytes::{Buf, BufMut};
use wire::{
    bytes_field_len, expect_wire, read_delimited, read_string, read_tag, read_uvarint, skip_field,
    tag_len, uvarint_field_len, uvarint_len, write_bytes_field, write_tag, write_uvarint,
    WIRE_BYTES, WIRE_FIXED64, WIRE_VARINT,
};

/// A message that can be encoded to and decoded from the wire format.
///
/// `decode_from` consumes the buffer to the end; callers decoding an
/// embedded message hand it the delimited sub-buffer.
pub trait Message: Default + Sized {
    /// Exact number of bytes `encode_into` will write.
    fn encoded_len(&self) -> usize;

    /// Appends the encoded message to `buf`.
    fn encode_into(&self, buf: &mut impl BufMut);

    /// Decodes a message from the remainder of `buf`.
    fn decode_from(buf: &mut impl Buf) -> Result<Self>;

    /// Encodes the message into a fresh byte vector.
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }

    /// Decodes a message from a byte slice.
    fn decode(data: &[u8]) -> Result<Self> {
        let mut buf = data;
        Self::decode_from(&mut buf)
    }
}

/// Writes an embedded message field, tag and length prefix included.
fn write_message_field(buf: &mut impl BufMut, field: u32, msg: &impl Message) {
    write_tag(buf, field, WIRE_BYTES);
    write_uvarint(buf, msg.encoded_len() as u64);
    msg.encode_into(buf);
}

/// Encoded size of an embedded message field, tag and length included.
fn message_field_len(field: u32, msg: &impl Message) -> usize {
    let len = msg.encoded_len();
    tag_len(field) + uvarint_len(len as u64) + len
}

/// Reads an embedded message bounded by its length prefix.
fn read_message<M: Message>(buf: &mut impl Buf) -> Result<M> {
    let mut sub = read_delimited(buf)?;
    M::decode_from(&mut sub)
}

/// Implements `Message` for messages with no fields.
macro_rules! empty_message {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $name;

        impl Message for $name {
            fn encoded_len(&self) -> usize {
                0
            }

            fn encode_into(&self, _buf: &mut impl BufMut) {}

            fn decode_from(buf: &mut impl Buf) -> Result<Self> {
                while buf.has_remaining() {
                    let (_, wire_type) = read_tag(buf)?;
                    skip_field(buf, wire_type)?;
                }
                Ok(Self)
            }
        }
    };
}

/// Request to record one observation against a set of fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackReq {
    /// Observation timestamp in nanoseconds
    pub time: u64,
    /// Sum of observed values
    pub total: f64,
    /// Number of observed values
    pub count: u64,
    /// Field-set identifying the series
    pub fields: Vec<String>,
}

impl Message for TrackReq {
    fn encoded_len(&self) -> usize {
        let mut n = 0;
        if self.time != 0 {
            n += uvarint_field_len(1, self.time);
        }
        if self.total != 0.0 {
            n += tag_len(2) + 8;
        }
        if self.count != 0 {
            n += uvarint_field_len(3, self.count);
        }
        for f in &self.fields {
            n += bytes_field_len(4, f.len());
        }
        n
    }

    fn encode_into(&self, buf: &mut impl BufMut) {
        if self.time != 0 {
            write_tag(buf, 1, WIRE_VARINT);
            write_uvarint(buf, self.time);
        }
        if self.total != 0.0 {
            write_tag(buf, 2, WIRE_FIXED64);
            buf.put_f64_le(self.total);
        }
        if self.count != 0 {
            write_tag(buf, 3, WIRE_VARINT);
            write_uvarint(buf, self.count);
        }
        for f in &self.fields {
            write_bytes_field(buf, 4, f.as_bytes());
        }
    }

    fn decode_from(buf: &mut impl Buf) -> Result<Self> {
        let mut msg = Self::default();
        while buf.has_remaining() {
            let (field, wire_type) = read_tag(buf)?;
            match field {
                1 => {
                    expect_wire(field, wire_type, WIRE_VARINT)?;
                    msg.time = read_uvarint(buf)?;
                }
                2 => {
                    expect_wire(field, wire_type, WIRE_FIXED64)?;
                    if buf.remaining() < 8 {
                        return Err(crate::error::Error::MalformedFrame(
                            "truncated fixed64".to_string(),
                        ));
                    }
                    msg.total = buf.get_f64_le();
                }
                3 => {
                    expect_wire(field, wire_type, WIRE_VARINT)?;
                    msg.count = read_uvarint(buf)?;
                }
                4 => {
                    expect_wire(field, wire_type, WIRE_BYTES)?;
                    msg.fields.push(read_string(buf)?);
                }
                _ => skip_field(buf, wire_type)?,
            }
        }
        Ok(msg)
    }
}

empty_message! {
    /// Acknowledgement of a track request.
    TrackRes
}

/// Request for a range of points matching a field-set query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReq {
    /// Range start in nanoseconds (inclusive)
    pub from: u64,
    /// Range end in nanoseconds (exclusive)
    pub to: u64,
    /// Field-set query, empty strings are wildcards
    pub fields: Vec<String>,
}

impl Message for FetchReq {
    fn encoded_len(&self) -> usize {
        let mut n = 0;
        if self.from != 0 {
            n += uvarint_field_len(1, self.from);
        }
        if self.to != 0 {
            n += uvarint_field_len(2, self.to);
        }
        for f in &self.fields {
            n += bytes_field_len(3, f.len());
        }
        n
    }

    fn encode_into(&self, buf: &mut impl BufMut) {
        if self.from != 0 {
            write_tag(buf, 1, WIRE_VARINT);
            write_uvarint(buf, self.from);
        }
        if self.to != 0 {
            write_tag(buf, 2, WIRE_VARINT);
            write_uvarint(buf, self.to);
        }
        for f in &self.fields {
            write_bytes_field(buf, 3, f.as_bytes());
        }
    }

    fn decode_from(buf: &mut impl Buf) -> Result<Self> {
        let mut msg = Self::default();
        while buf.has_remaining() {
            let (field, wire_type) = read_tag(buf)?;
            match field {
                1 => {
                    expect_wire(field, wire_type, WIRE_VARINT)?;
                    msg.from = read_uvarint(buf)?;
                }
                2 => {
                    expect_wire(field, wire_type, WIRE_VARINT)?;
                    msg.to = read_uvarint(buf)?;
                }
                3 => {
                    expect_wire(field, wire_type, WIRE_BYTES)?;
                    msg.fields.push(read_string(buf)?);
                }
                _ => skip_field(buf, wire_type)?,
            }
        }
        Ok(msg)
    }
}

/// One field-set's slice of a fetch result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk {
    /// Field-set the points belong to
    pub fields: Vec<String>,
    /// One fixed-size payload per point in the requested window
    pub points: Vec<Vec<u8>>,
}

impl Message for Chunk {
    fn encoded_len(&self) -> usize {
        let mut n = 0;
        for f in &self.fields {
            n += bytes_field_len(1, f.len());
        }
        for p in &self.points {
            n += bytes_field_len(2, p.len());
        }
        n
    }

    fn encode_into(&self, buf: &mut impl BufMut) {
        for f in &self.fields {
            write_bytes_field(buf, 1, f.as_bytes());
        }
        for p in &self.points {
            write_bytes_field(buf, 2, p);
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
                    expect_wire(field, wire_type, WIRE_BYTES)?;
                    msg.points.push(read_delimited(buf)?.to_vec());
                }
                _ => skip_field(buf, wire_type)?,
            }
        }
        Ok(msg)
    }
}

/// Fetch result: one chunk per matched field-set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchRes {
    /// Matched field-sets with their reassembled point windows
    pub chunks: Vec<Chunk>,
}

impl Message for FetchRes {
    fn encoded_len(&self) -> usize {
        self.chunks.iter().map(|c| message_field_len(1, c)).sum()
    }

    fn encode_into(&self, buf: &mut impl BufMut) {
        for c in &self.chunks {
            write_message_field(buf, 1, c);
        }
    }

    fn decode_from(buf: &mut impl Buf) -> Result<Self> {
        let mut msg = Self::default();
        while buf.has_remaining() {
            let (field, wire_type) = read_tag(buf)?;
            match field {
                1 => {
                    expect_wire(field, wire_type, WIRE_BYTES)?;
                    msg.chunks.push(read_message(buf)?);
                }
                _ => skip_field(buf, wire_type)?,
            }
        }
        Ok(msg)
    }
}

empty_message! {
    /// Request to flush pending writes to disk.
    SyncReq
}

empty_message! {
    /// Acknowledgement of a sync request.
    SyncRes
}

/// One operation against a named database.
///
/// Exactly one of the variant fields should be set; receivers process the
/// first set variant in field-number order and ignore the rest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Request {
    /// Target database name
    pub database: String,
    /// Record an observation
    pub track: Option<TrackReq>,
    /// Read a range of points
    pub fetch: Option<FetchReq>,
    /// Flush pending writes
    pub sync: Option<SyncReq>,
}

impl Message for Request {
    fn encoded_len(&self) -> usize {
        let mut n = 0;
        if !self.database.is_empty() {
            n += bytes_field_len(1, self.database.len());
        }
        if let Some(m) = &self.track {
            n += message_field_len(2, m);
        }
        if let Some(m) = &self.fetch {
            n += message_field_len(3, m);
        }
        if let Some(m) = &self.sync {
            n += message_field_len(4, m);
        }
        n
    }

    fn encode_into(&self, buf: &mut impl BufMut) {
        if !self.database.is_empty() {
            write_bytes_field(buf, 1, self.database.as_bytes());
        }
        if let Some(m) = &self.track {
            write_message_field(buf, 2, m);
        }
        if let Some(m) = &self.fetch {
            write_message_field(buf, 3, m);
        }
        if let Some(m) = &self.sync {
            write_message_field(buf, 4, m);
        }
    }

    fn decode_from(buf: &mut impl Buf) -> Result<Self> {
        let mut msg = Self::default();
        while buf.has_remaining() {
            let (field, wire_type) = read_tag(buf)?;
            match field {
                1 => {
                    expect_wire(field, wire_type, WIRE_BYTES)?;
                    msg.database = read_string(buf)?;
                }
                2 => {
                    expect_wire(field, wire_type, WIRE_BYTES)?;
                    msg.track = Some(read_message(buf)?);
                }
                3 => {
                    expect_wire(field, wire_type, WIRE_BYTES)?;
                    msg.fetch = Some(read_message(buf)?);
                }
                4 => {
                    expect_wire(field, wire_type, WIRE_BYTES)?;
                    msg.sync = Some(read_message(buf)?);
                }
                _ => skip_field(buf, wire_type)?,
            }
        }
        Ok(msg)
    }
}

/// Result of one request; an empty `error` string means success.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    /// Error description, empty on success
    pub error: String,
    /// Result of a track request
    pub track: Option<TrackRes>,
    /// Result of a fetch request
    pub fetch: Option<FetchRes>,
    /// Result of a sync request
    pub sync: Option<SyncRes>,
}

impl Message for Response {
    fn encoded_len(&self) -> usize {
        let mut n = 0;
        if !self.error.is_empty() {
            n += bytes_field_len(1, self.error.len());
        }
        if let Some(m) = &self.track {
            n += message_field_len(2, m);
        }
        if let Some(m) = &self.fetch {
            n += message_field_len(3, m);
        }
        if let Some(m) = &self.sync {
            n += message_field_len(4, m);
        }
        n
    }

    fn encode_into(&self, buf: &mut impl BufMut) {
        if !self.error.is_empty() {
            write_bytes_field(buf, 1, self.error.as_bytes());
        }
        if let Some(m) = &self.track {
            write_message_field(buf, 2, m);
        }
        if let Some(m) = &self.fetch {
            write_message_field(buf, 3, m);
        }
        if let Some(m) = &self.sync {
            write_message_field(buf, 4, m);
        }
    }

    fn decode_from(buf: &mut impl Buf) -> Result<Self> {
        let mut msg = Self::default();
        while buf.has_remaining() {
            let (field, wire_type) = read_tag(buf)?;
            match field {
                1 => {
                    expect_wire(field, wire_type, WIRE_BYTES)?;
                    msg.error = read_string(buf)?;
                }
                2 => {
                    expect_wire(field, wire_type, WIRE_BYTES)?;
                    msg.track = Some(read_message(buf)?);
                }
                3 => {
                    expect_wire(field, wire_type, WIRE_BYTES)?;
                    msg.fetch = Some(read_message(buf)?);
                }
                4 => {
                    expect_wire(field, wire_type, WIRE_BYTES)?;
                    msg.sync = Some(read_message(buf)?);
                }
                _ => skip_field(buf, wire_type)?,
            }
        }
        Ok(msg)
    }
}

/// A batch of requests sharing one correlation id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestBatch {
    /// Correlation token echoed in the response batch
    pub id: i64,
    /// Requests, answered in order
    pub batch: Vec<Request>,
}

impl Message for RequestBatch {
    fn encoded_len(&self) -> usize {
        let mut n = 0;
        if self.id != 0 {
            n += uvarint_field_len(1, self.id as u64);
        }
        for r in &self.batch {
            n += message_field_len(2, r);
        }
        n
    }

    fn encode_into(&self, buf: &mut impl BufMut) {
        if self.id != 0 {
            write_tag(buf, 1, WIRE_VARINT);
            write_uvarint(buf, self.id as u64);
        }
        for r in &self.batch {
            write_message_field(buf, 2, r);
        }
    }

    fn decode_from(buf: &mut impl Buf) -> Result<Self> {
        let mut msg = Self::default();
        while buf.has_remaining() {
            let (field, wire_type) = read_tag(buf)?;
            match field {
                1 => {
                    expect_wire(field, wire_type, WIRE_VARINT)?;
                    msg.id = read_uvarint(buf)? as i64;
                }
                2 => {
                    expect_wire(field, wire_type, WIRE_BYTES)?;
                    msg.batch.push(read_message(buf)?);
                }
                _ => skip_field(buf, wire_type)?,
            }
        }
        Ok(msg)
    }
}

/// Responses for one request batch, in request order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseBatch {
    /// Correlation token of the matching request batch
    pub id: i64,
    /// One response per request, same order
    pub batch: Vec<Response>,
}

impl Message for ResponseBatch {
    fn encoded_len(&self) -> usize {
        let mut n = 0;
        if self.id != 0 {
            n += uvarint_field_len(1, self.id as u64);
        }
        for r in &self.batch {
            n += message_field_len(2, r);
        }
        n
    }

    fn encode_into(&self, buf: &mut impl BufMut) {
        if self.id != 0 {
            write_tag(buf, 1, WIRE_VARINT);
            write_uvarint(buf, self.id as u64);
        }
        for r in &self.batch {
            write_message_field(buf, 2, r);
        }
    }

    fn decode_from(buf: &mut impl Buf) -> Result<Self> {
        let mut msg = Self::default();
        while buf.has_remaining() {
            let (field, wire_type) = read_tag(buf)?;
            match field {
                1 => {
                    expect_wire(field, wire_type, WIRE_VARINT)?;
                    msg.id = read_uvarint(buf)? as i64;
                }
                2 => {
                    expect_wire(field, wire_type, WIRE_BYTES)?;
                    msg.batch.push(read_message(buf)?);
                }
                _ => skip_field(buf, wire_type)?,
            }
        }
        Ok(msg)
    }
}
