//! Framed record storage.
//!
//! Every stored record is `"ITEM"` + one flags byte + body. Payloads of 256
//! bytes or more get a compression pass (kept only when it shrinks them); a
//! payload too large for a single KV value is split into chunks under the
//! record's blob subspace, with the envelope body holding a manifest of chunk
//! keys (varint count, then length-prefixed keys).

use crate::error::{Error, Result};
use crate::subspace::Subspace;
use crate::transaction::Transaction;
use crate::value::Value;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

const MAGIC: [u8; 4] = *b"ITEM";
const FLAG_COMPRESSED: u8 = 0b0000_0001;
const FLAG_CHUNKED: u8 = 0b0000_0010;

/// Payloads below this are never compressed.
const COMPRESSION_THRESHOLD: usize = 256;
/// Envelope bodies above this are chunked (the KV store's per-value limit,
/// minus framing headroom).
const CHUNK_THRESHOLD: usize = 90_000;
const CHUNK_SIZE: usize = 80_000;
/// Hard ceiling on one record, chunked or not.
const MAX_RECORD_SIZE: usize = 32 * 1024 * 1024;

fn io_err(e: std::io::Error) -> Error { Error::corrupt(format!("compression stream error: {e}")) }

/// Write `payload` as the record at `record_key`. `blob_space` is the
/// record's private blob subspace; any chunks from a previous version are
/// cleared first.
pub async fn write(txn: &Transaction, record_key: &[u8], blob_space: &Subspace, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_RECORD_SIZE {
        return Err(Error::OversizeValue { size: payload.len(), limit: MAX_RECORD_SIZE });
    }

    let (begin, end) = blob_space.range();
    txn.clear_range(&begin, &end)?;

    let mut flags = 0u8;
    let mut body: Vec<u8>;
    if payload.len() >= COMPRESSION_THRESHOLD {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload).map_err(io_err)?;
        let compressed = encoder.finish().map_err(io_err)?;
        if compressed.len() < payload.len() {
            flags |= FLAG_COMPRESSED;
            body = compressed;
        } else {
            body = payload.to_vec();
        }
    } else {
        body = payload.to_vec();
    }

    if body.len() > CHUNK_THRESHOLD {
        flags |= FLAG_CHUNKED;
        let mut manifest = Vec::new();
        let chunk_count = body.len().div_ceil(CHUNK_SIZE);
        write_varint(chunk_count as u64, &mut manifest);
        for (seq, chunk) in body.chunks(CHUNK_SIZE).enumerate() {
            let chunk_key = blob_space.pack_one(&Value::Int(seq as i64))?;
            txn.set(&chunk_key, chunk)?;
            write_varint(chunk_key.len() as u64, &mut manifest);
            manifest.extend_from_slice(&chunk_key);
        }
        tracing::debug!(chunks = chunk_count, bytes = body.len(), "record chunked");
        body = manifest;
    }

    let mut envelope = Vec::with_capacity(5 + body.len());
    envelope.extend_from_slice(&MAGIC);
    envelope.push(flags);
    envelope.extend_from_slice(&body);
    txn.set(record_key, &envelope)
}

/// Read the record at `record_key`, reassembling chunks and decompressing as
/// the flags dictate. `None` when no record exists.
pub async fn read(txn: &Transaction, record_key: &[u8], snapshot: bool) -> Result<Option<Vec<u8>>> {
    match if snapshot { txn.get_snapshot(record_key).await? } else { txn.get(record_key).await? } {
        Some(raw) => decode_body(txn, &raw, snapshot).await.map(Some),
        None => Ok(None),
    }
}

/// Decode raw envelope bytes already in hand (a range scan over records).
pub(crate) async fn decode_body(txn: &Transaction, envelope: &[u8], snapshot: bool) -> Result<Vec<u8>> {
    if envelope.len() < 5 || envelope[..4] != MAGIC {
        return Err(Error::corrupt("record envelope missing ITEM magic"));
    }
    let flags = envelope[4];
    let body = &envelope[5..];

    let mut payload = if flags & FLAG_CHUNKED != 0 {
        let mut pos = 0;
        let chunk_count = read_varint(body, &mut pos)?;
        let mut assembled = Vec::new();
        for _ in 0..chunk_count {
            let key_len = read_varint(body, &mut pos)? as usize;
            let chunk_key = body
                .get(pos..pos + key_len)
                .ok_or_else(|| Error::corrupt("chunk manifest truncated"))?;
            pos += key_len;
            let chunk = match if snapshot { txn.get_snapshot(chunk_key).await? } else { txn.get(chunk_key).await? } {
                Some(chunk) => chunk,
                None => return Err(Error::corrupt("chunk named by manifest is missing")),
            };
            assembled.extend_from_slice(&chunk);
        }
        assembled
    } else {
        body.to_vec()
    };

    if flags & FLAG_COMPRESSED != 0 {
        let mut decoder = ZlibDecoder::new(payload.as_slice());
        let mut plain = Vec::new();
        decoder.read_to_end(&mut plain).map_err(io_err)?;
        payload = plain;
    }
    Ok(payload)
}

/// Remove the record and every chunk belonging to it.
pub fn delete(txn: &Transaction, record_key: &[u8], blob_space: &Subspace) -> Result<()> {
    let (begin, end) = blob_space.range();
    txn.clear_range(&begin, &end)?;
    txn.clear(record_key)
}

fn write_varint(mut v: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn read_varint(bytes: &[u8], pos: &mut usize) -> Result<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *bytes.get(*pos).ok_or_else(|| Error::corrupt("truncated varint"))?;
        *pos += 1;
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift >= 64 {
            return Err(Error::corrupt("varint overflow"));
        }
    }
}
