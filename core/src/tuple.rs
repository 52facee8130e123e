//! Order-preserving tuple codec.
//!
//! `pack` turns a sequence of [`Value`]s into a byte key whose lexicographic
//! order equals the logical order of the values; `unpack` reverses it. Each
//! element is a type tag followed by a payload:
//!
//! - integers: big-endian two's complement with the sign bit flipped, so
//!   negative numbers order before positive ones
//! - floats: big-endian IEEE 754; positive values flip the sign bit, negative
//!   values flip every bit, ordering them smallest to largest with NaN last
//! - strings and byte strings: raw bytes with 0x00 escaped as 0x00 0xff,
//!   terminated by 0x00, so a shorter key orders before its extensions
//! - nested tuples: recursive, with null elements escaped as 0x00 0xff to
//!   keep the 0x00 terminator unambiguous
//!
//! There is exactly one encoding per value; [`crate::value::Value`]'s `Ord`
//! is defined to agree with it.

use crate::error::{Error, Result};
use crate::value::Value;
use uuid::Uuid;

const NIL: u8 = 0x00;
const BYTES: u8 = 0x01;
const STRING: u8 = 0x02;
const NESTED: u8 = 0x05;
const INT: u8 = 0x11;
const FLOAT: u8 = 0x21;
const TIMESTAMP: u8 = 0x22;
const BOOL: u8 = 0x26;
const UUID: u8 = 0x30;

const ESCAPE: u8 = 0xff;

pub fn pack(values: &[Value]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(values.len() * 9);
    for value in values {
        encode_value(value, false, &mut out)?;
    }
    Ok(out)
}

pub fn pack_one(value: &Value) -> Result<Vec<u8>> { pack(std::slice::from_ref(value)) }

pub fn unpack(bytes: &[u8]) -> Result<Vec<Value>> {
    let mut values = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let (value, next) = decode_value(bytes, pos)?;
        values.push(value);
        pos = next;
    }
    Ok(values)
}

fn encode_value(value: &Value, nested: bool, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Null => {
            out.push(NIL);
            if nested {
                // Distinguish a null element from the nested terminator.
                out.push(ESCAPE);
            }
        }
        Value::Bytes(b) => {
            out.push(BYTES);
            encode_escaped(b, out);
        }
        Value::String(s) => {
            out.push(STRING);
            encode_escaped(s.as_bytes(), out);
        }
        Value::Tuple(elements) => {
            out.push(NESTED);
            for element in elements {
                encode_value(element, true, out)?;
            }
            out.push(NIL);
        }
        Value::Int(v) => {
            out.push(INT);
            let mut bytes = v.to_be_bytes();
            bytes[0] ^= 1 << 7;
            out.extend(bytes);
        }
        Value::Float(v) => {
            out.push(FLOAT);
            out.extend(float_to_ordered(*v));
        }
        Value::Timestamp(v) => {
            out.push(TIMESTAMP);
            out.extend(float_to_ordered(*v));
        }
        Value::Bool(v) => {
            out.push(BOOL);
            out.push(if *v { 1 } else { 0 });
        }
        Value::Uuid(v) => {
            out.push(UUID);
            out.extend(v.as_bytes());
        }
    }
    Ok(())
}

fn encode_escaped(bytes: &[u8], out: &mut Vec<u8>) {
    for &byte in bytes {
        out.push(byte);
        if byte == 0x00 {
            out.push(ESCAPE);
        }
    }
    out.push(0x00);
}

fn float_to_ordered(v: f64) -> [u8; 8] {
    let mut bytes = v.to_be_bytes();
    if v.is_sign_negative() {
        bytes.iter_mut().for_each(|b| *b = !*b);
    } else {
        bytes[0] ^= 1 << 7;
    }
    bytes
}

fn float_from_ordered(bytes: [u8; 8]) -> f64 {
    let mut bytes = bytes;
    if bytes[0] & 0x80 != 0 {
        bytes[0] ^= 1 << 7;
    } else {
        bytes.iter_mut().for_each(|b| *b = !*b);
    }
    f64::from_be_bytes(bytes)
}

fn decode_value(bytes: &[u8], pos: usize) -> Result<(Value, usize)> {
    let tag = *bytes.get(pos).ok_or_else(|| Error::TupleEncoding("truncated tuple".into()))?;
    let pos = pos + 1;
    match tag {
        NIL => Ok((Value::Null, pos)),
        BYTES => {
            let (raw, next) = decode_escaped(bytes, pos)?;
            Ok((Value::Bytes(raw), next))
        }
        STRING => {
            let (raw, next) = decode_escaped(bytes, pos)?;
            let s = String::from_utf8(raw).map_err(|e| Error::TupleEncoding(format!("invalid utf-8 in string element: {e}")))?;
            Ok((Value::String(s), next))
        }
        NESTED => {
            let mut elements = Vec::new();
            let mut pos = pos;
            loop {
                match bytes.get(pos) {
                    None => return Err(Error::TupleEncoding("unterminated nested tuple".into())),
                    Some(&NIL) => {
                        if bytes.get(pos + 1) == Some(&ESCAPE) {
                            elements.push(Value::Null);
                            pos += 2;
                        } else {
                            return Ok((Value::Tuple(elements), pos + 1));
                        }
                    }
                    Some(_) => {
                        let (element, next) = decode_value(bytes, pos)?;
                        elements.push(element);
                        pos = next;
                    }
                }
            }
        }
        INT => {
            let mut raw: [u8; 8] = fixed(bytes, pos)?;
            raw[0] ^= 1 << 7;
            Ok((Value::Int(i64::from_be_bytes(raw)), pos + 8))
        }
        FLOAT => Ok((Value::Float(float_from_ordered(fixed(bytes, pos)?)), pos + 8)),
        TIMESTAMP => Ok((Value::Timestamp(float_from_ordered(fixed(bytes, pos)?)), pos + 8)),
        BOOL => {
            let b = *bytes.get(pos).ok_or_else(|| Error::TupleEncoding("truncated bool element".into()))?;
            Ok((Value::Bool(b != 0), pos + 1))
        }
        UUID => {
            let raw: [u8; 16] = fixed(bytes, pos)?;
            Ok((Value::Uuid(Uuid::from_bytes(raw)), pos + 16))
        }
        other => Err(Error::TupleEncoding(format!("unknown type tag 0x{other:02x}"))),
    }
}

fn fixed<const N: usize>(bytes: &[u8], pos: usize) -> Result<[u8; N]> {
    bytes
        .get(pos..pos + N)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| Error::TupleEncoding("truncated fixed-width element".into()))
}

fn decode_escaped(bytes: &[u8], mut pos: usize) -> Result<(Vec<u8>, usize)> {
    let mut out = Vec::new();
    loop {
        match bytes.get(pos) {
            None => return Err(Error::TupleEncoding("unterminated byte-string element".into())),
            Some(&0x00) => {
                if bytes.get(pos + 1) == Some(&ESCAPE) {
                    out.push(0x00);
                    pos += 2;
                } else {
                    return Ok((out, pos + 1));
                }
            }
            Some(&byte) => {
                out.push(byte);
                pos += 1;
            }
        }
    }
}
