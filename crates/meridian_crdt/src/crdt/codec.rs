//! # Wire Codec
//!
//! Converts between byte batches and [`CrdtMessage`] records.
//!
//! ## Design
//!
//! - Little-endian, length-prefixed records: a reader needs only the bytes
//! - Decoding rents payload buffers from the pool, nothing else allocates
//! - Encoding is presize-driven: sum `data_length`, rent once, write each
//!   record at its offset
//!
//! Malformed records are dropped one at a time with a warning. A record
//! whose length prefix cannot be trusted ends the batch, since there is no
//! way to find the next record boundary.

use std::sync::Arc;

use meridian_core::{BufferPool, ComponentId, PoolResult, PooledBuffer, SceneEntity};
use tracing::warn;

use super::message::{
    ComponentMessage, CrdtMessage, CrdtMessageKind, ProcessedCrdtMessage, COMPONENT_BODY_LEN,
    DELETE_BODY_LEN, HEADER_LEN,
};
use crate::error::{CodecError, CodecResult};

/// Counters for one decoded batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Records decoded into messages.
    pub decoded: usize,
    /// Records skipped (unknown kind, inconsistent body, oversized payload).
    pub skipped: usize,
    /// Trailing bytes dropped because the last record was cut short.
    pub truncated_bytes: usize,
}

/// Messages decoded from one batch, in wire order.
#[derive(Debug, Default)]
pub struct DecodedBatch {
    /// Decoded messages.
    pub messages: Vec<CrdtMessage>,
    /// Decode counters.
    pub stats: DecodeStats,
}

/// Bounds-checked little-endian reader over a byte slice.
struct ByteReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    const fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    #[inline]
    const fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    #[inline]
    fn read_u32(&mut self) -> Option<u32> {
        let bytes = self.buffer.get(self.position..self.position + 4)?;
        self.position += 4;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    #[inline]
    fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let bytes = self.buffer.get(self.position..self.position.checked_add(len)?)?;
        self.position += len;
        Some(bytes)
    }
}

/// Decodes byte batches into messages.
pub struct CrdtDeserializer {
    pool: Arc<BufferPool>,
}

impl CrdtDeserializer {
    /// Creates a deserializer renting payloads from `pool`.
    #[must_use]
    pub fn new(pool: Arc<BufferPool>) -> Self {
        Self { pool }
    }

    /// Decodes every record in `bytes`, in wire order.
    ///
    /// # Errors
    ///
    /// Only pool exhaustion fails the batch. Malformed data is dropped and
    /// counted in [`DecodeStats`].
    pub fn deserialize_batch(&self, bytes: &[u8]) -> PoolResult<DecodedBatch> {
        let mut batch = DecodedBatch::default();
        let mut reader = ByteReader::new(bytes);

        while reader.remaining() > 0 {
            let record_start = reader.position;
            let remaining = reader.remaining();

            let (Some(length), Some(tag)) = (reader.read_u32(), reader.read_u32()) else {
                warn!(remaining, "truncated CRDT record header dropped");
                batch.stats.truncated_bytes = remaining;
                break;
            };
            let length = length as usize;

            if length < HEADER_LEN {
                warn!(length, remaining, "CRDT record length below header size, dropping rest of batch");
                batch.stats.truncated_bytes = remaining;
                break;
            }
            let Some(body) = reader.read_bytes(length - HEADER_LEN) else {
                warn!(length, remaining, "truncated CRDT record dropped");
                batch.stats.truncated_bytes = remaining;
                break;
            };

            let Some(kind) = CrdtMessageKind::from_tag(tag) else {
                warn!(tag, offset = record_start, "unknown CRDT message kind skipped");
                batch.stats.skipped += 1;
                continue;
            };

            match self.decode_body(kind, body)? {
                Some(message) => {
                    batch.messages.push(message);
                    batch.stats.decoded += 1;
                }
                None => {
                    warn!(?kind, length, offset = record_start, "malformed CRDT record skipped");
                    batch.stats.skipped += 1;
                }
            }
        }

        Ok(batch)
    }

    fn decode_body(&self, kind: CrdtMessageKind, body: &[u8]) -> PoolResult<Option<CrdtMessage>> {
        let mut reader = ByteReader::new(body);

        match kind {
            CrdtMessageKind::DeleteEntity => {
                if body.len() != DELETE_BODY_LEN {
                    return Ok(None);
                }
                let Some(entity) = reader.read_u32() else {
                    return Ok(None);
                };
                Ok(Some(CrdtMessage::delete_entity(SceneEntity::from_raw(entity))))
            }
            CrdtMessageKind::PutComponent | CrdtMessageKind::AppendComponent => {
                let (Some(entity), Some(component), Some(timestamp), Some(payload_len)) = (
                    reader.read_u32(),
                    reader.read_u32(),
                    reader.read_u32(),
                    reader.read_u32(),
                ) else {
                    return Ok(None);
                };
                let payload_len = payload_len as usize;
                if body.len() - COMPONENT_BODY_LEN != payload_len
                    || payload_len > self.pool.config().max_buffer_len
                {
                    return Ok(None);
                }
                let Some(bytes) = reader.read_bytes(payload_len) else {
                    return Ok(None);
                };

                let body = ComponentMessage {
                    entity: SceneEntity::from_raw(entity),
                    component: ComponentId(component),
                    timestamp,
                    payload: self.pool.rent_copy(bytes)?,
                };
                Ok(Some(if kind == CrdtMessageKind::PutComponent {
                    CrdtMessage::PutComponent(body)
                } else {
                    CrdtMessage::AppendComponent(body)
                }))
            }
        }
    }
}

/// Writes records into a presized span.
///
/// Every write is bounds-checked and returns `false` instead of growing.
pub struct CrdtWriter<'a> {
    buffer: &'a mut [u8],
    position: usize,
}

impl<'a> CrdtWriter<'a> {
    /// Creates a writer over `buffer`, starting at offset 0.
    #[must_use]
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    /// Returns the number of bytes written.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.position
    }

    /// Returns true if no bytes have been written.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.position == 0
    }

    /// Writes a u32 in little-endian format.
    #[inline]
    pub fn write_u32(&mut self, value: u32) -> bool {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Writes raw bytes.
    #[inline]
    pub fn write_bytes(&mut self, bytes: &[u8]) -> bool {
        let end = self.position + bytes.len();
        let Some(span) = self.buffer.get_mut(self.position..end) else {
            return false;
        };
        span.copy_from_slice(bytes);
        self.position = end;
        true
    }

    /// Writes one complete record.
    #[allow(clippy::cast_possible_truncation)]
    pub fn write_message(&mut self, message: &CrdtMessage) -> bool {
        let length = message.data_length();
        if self.position + length > self.buffer.len() {
            return false;
        }

        if !(self.write_u32(length as u32) && self.write_u32(message.kind().tag())) {
            return false;
        }

        match message {
            CrdtMessage::PutComponent(body) | CrdtMessage::AppendComponent(body) => {
                self.write_u32(body.entity.raw())
                    && self.write_u32(body.component.0)
                    && self.write_u32(body.timestamp)
                    && self.write_u32(body.payload.len() as u32)
                    && self.write_bytes(&body.payload)
            }
            CrdtMessage::DeleteEntity { entity } => self.write_u32(entity.raw()),
        }
    }
}

/// Record encoder for growable and presized outputs.
pub struct CrdtSerializer;

impl CrdtSerializer {
    /// Appends one record to a growable buffer.
    pub fn serialize(message: &CrdtMessage, out: &mut Vec<u8>) {
        let start = out.len();
        out.resize(start + message.data_length(), 0);
        let written = CrdtWriter::new(&mut out[start..]).write_message(message);
        debug_assert!(written, "span was sized from data_length");
    }

    /// Writes one record at the start of `span`, returning the bytes written.
    ///
    /// # Errors
    ///
    /// [`CodecError::BufferTooSmall`] if the span cannot hold the record.
    pub fn write_into(message: &CrdtMessage, span: &mut [u8]) -> CodecResult<usize> {
        let needed = message.data_length();
        if !CrdtWriter::new(span).write_message(message) {
            return Err(CodecError::BufferTooSmall {
                needed,
                available: span.len(),
            });
        }
        Ok(needed)
    }
}

/// Serializes presized messages into one pooled buffer of `total_len` bytes.
///
/// `total_len` must equal the sum of the messages' `data_length`.
///
/// # Errors
///
/// [`CodecError::Pool`] if the buffer cannot be rented,
/// [`CodecError::LengthMismatch`] if `total_len` does not match.
pub fn serialize_processed(
    messages: &[ProcessedCrdtMessage],
    total_len: usize,
    pool: &Arc<BufferPool>,
) -> CodecResult<PooledBuffer> {
    let computed: usize = messages.iter().map(|m| m.data_length).sum();
    if computed != total_len {
        return Err(CodecError::LengthMismatch {
            expected: total_len,
            actual: computed,
        });
    }

    let mut output = pool.rent(total_len)?;
    let mut offset = 0;
    for processed in messages {
        let end = offset + processed.data_length;
        CrdtSerializer::write_into(&processed.message, &mut output[offset..end])?;
        offset = end;
    }
    Ok(output)
}
