//! Binary JSON decoder (§4.5, §9): MySQL's internal `JSON` column binlog
//! representation, decoded into canonical textual JSON.
//!
//! Not present anywhere in the teacher or the rest of the pack (confirmed:
//! no example repo implements this format), so this is built fresh from
//! the layout documented by MySQL internals (`json_binary.cc`): a leading
//! type byte followed by either a scalar payload or, for objects/arrays,
//! an element/key-offset table. Recursion is depth-limited per §9.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use crate::error::{Error, Result};

const MAX_DEPTH: usize = 100;

const JSONB_TYPE_SMALL_OBJECT: u8 = 0x00;
const JSONB_TYPE_LARGE_OBJECT: u8 = 0x01;
const JSONB_TYPE_SMALL_ARRAY: u8 = 0x02;
const JSONB_TYPE_LARGE_ARRAY: u8 = 0x03;
const JSONB_TYPE_LITERAL: u8 = 0x04;
const JSONB_TYPE_INT16: u8 = 0x05;
const JSONB_TYPE_UINT16: u8 = 0x06;
const JSONB_TYPE_INT32: u8 = 0x07;
const JSONB_TYPE_UINT32: u8 = 0x08;
const JSONB_TYPE_INT64: u8 = 0x09;
const JSONB_TYPE_UINT64: u8 = 0x0A;
const JSONB_TYPE_DOUBLE: u8 = 0x0B;
const JSONB_TYPE_STRING: u8 = 0x0C;
const JSONB_TYPE_OPAQUE: u8 = 0x0F;

const LITERAL_NULL: u8 = 0x00;
const LITERAL_TRUE: u8 = 0x01;
const LITERAL_FALSE: u8 = 0x02;

/// Decodes a binary JSON column value into its canonical textual form.
pub fn decode(bytes: &[u8]) -> Result<String> {
    if bytes.is_empty() {
        return Ok("null".to_string());
    }
    let type_byte = bytes[0];
    let mut out = String::new();
    decode_value(type_byte, &bytes[1..], bytes, 1, &mut out, 0)?;
    Ok(out)
}

fn decode_value(type_byte: u8, body: &[u8], doc: &[u8], base_offset: usize, out: &mut String, depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(Error::CorruptRowImage("binary JSON nesting exceeds depth limit".into()));
    }
    match type_byte {
        JSONB_TYPE_SMALL_OBJECT => decode_container(body, doc, base_offset, out, depth, false, true),
        JSONB_TYPE_LARGE_OBJECT => decode_container(body, doc, base_offset, out, depth, true, true),
        JSONB_TYPE_SMALL_ARRAY => decode_container(body, doc, base_offset, out, depth, false, false),
        JSONB_TYPE_LARGE_ARRAY => decode_container(body, doc, base_offset, out, depth, true, false),
        JSONB_TYPE_LITERAL => {
            match body.first() {
                Some(&LITERAL_NULL) => out.push_str("null"),
                Some(&LITERAL_TRUE) => out.push_str("true"),
                Some(&LITERAL_FALSE) => out.push_str("false"),
                _ => return Err(Error::CorruptRowImage("invalid JSON literal byte".into())),
            }
            Ok(())
        }
        JSONB_TYPE_INT16 => {
            out.push_str(&read_i16(body)?.to_string());
            Ok(())
        }
        JSONB_TYPE_UINT16 => {
            out.push_str(&read_u16(body)?.to_string());
            Ok(())
        }
        JSONB_TYPE_INT32 => {
            out.push_str(&read_i32(body)?.to_string());
            Ok(())
        }
        JSONB_TYPE_UINT32 => {
            out.push_str(&read_u32(body)?.to_string());
            Ok(())
        }
        JSONB_TYPE_INT64 => {
            out.push_str(&read_i64(body)?.to_string());
            Ok(())
        }
        JSONB_TYPE_UINT64 => {
            out.push_str(&read_u64(body)?.to_string());
            Ok(())
        }
        JSONB_TYPE_DOUBLE => {
            let v = Cursor::new(body).read_f64::<LittleEndian>().map_err(Error::Io)?;
            out.push_str(&format_double(v));
            Ok(())
        }
        JSONB_TYPE_STRING => {
            let mut cursor = Cursor::new(body);
            let len = read_variable_length(&mut cursor)?;
            let start = cursor.position() as usize;
            let s = std::str::from_utf8(&body[start..start + len])
                .map_err(|e| Error::CorruptRowImage(format!("invalid utf-8 in JSON string: {e}")))?;
            write_json_string(out, s);
            Ok(())
        }
        JSONB_TYPE_OPAQUE => {
            let mut cursor = Cursor::new(body);
            let _field_type = cursor.read_u8().map_err(Error::Io)?;
            let len = read_variable_length(&mut cursor)?;
            let start = cursor.position() as usize;
            // opaque (DECIMAL/TIME/etc payloads embedded in JSON) renders
            // as a base64-less hex string; this crate does not attempt to
            // re-decode the inner MySQL type.
            out.push('"');
            for b in &body[start..start + len] {
                out.push_str(&format!("{:02x}", b));
            }
            out.push('"');
            Ok(())
        }
        other => Err(Error::CorruptRowImage(format!("unknown binary JSON type byte {other:#x}"))),
    }
}

fn decode_container(
    body: &[u8],
    doc: &[u8],
    base_offset: usize,
    out: &mut String,
    depth: usize,
    large: bool,
    is_object: bool,
) -> Result<()> {
    let offset_size = if large { 4 } else { 2 };
    let mut cursor = Cursor::new(body);
    let count = read_sized(&mut cursor, offset_size)? as usize;
    let _size = read_sized(&mut cursor, offset_size)?;

    let mut key_offsets = Vec::with_capacity(count);
    if is_object {
        for _ in 0..count {
            let key_offset = read_sized(&mut cursor, offset_size)?;
            let key_len = read_sized(&mut cursor, 2)?;
            key_offsets.push((key_offset as usize, key_len as usize));
        }
    }

    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let entry_type = cursor.read_u8().map_err(Error::Io)?;
        if is_inline_value(entry_type, large) {
            let inline_bytes = if large { 4 } else { 2 };
            let mut buf = vec![0u8; inline_bytes];
            std::io::Read::read_exact(&mut cursor, &mut buf).map_err(Error::Io)?;
            entries.push((entry_type, InlineOrOffset::Inline(buf)));
        } else {
            let value_offset = read_sized(&mut cursor, offset_size)?;
            entries.push((entry_type, InlineOrOffset::Offset(value_offset as usize)));
        }
    }

    out.push(if is_object { '{' } else { '[' });
    for (i, (entry_type, location)) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if is_object {
            let (key_offset, key_len) = key_offsets[i];
            let key_start = base_offset + key_offset;
            let key = std::str::from_utf8(&doc[key_start..key_start + key_len])
                .map_err(|e| Error::CorruptRowImage(format!("invalid utf-8 in JSON key: {e}")))?;
            write_json_string(out, key);
            out.push(':');
        }

        match location {
            InlineOrOffset::Inline(bytes) => decode_value(entry_type, &bytes, doc, base_offset, out, depth + 1)?,
            InlineOrOffset::Offset(value_offset) => {
                let start = base_offset + value_offset;
                decode_value(entry_type, &doc[start..], doc, start, out, depth + 1)?;
            }
        }
    }
    out.push(if is_object { '}' } else { ']' });
    Ok(())
}

enum InlineOrOffset {
    Inline(Vec<u8>),
    Offset(usize),
}

fn is_inline_value(entry_type: u8, large: bool) -> bool {
    match entry_type {
        JSONB_TYPE_LITERAL => true,
        JSONB_TYPE_INT16 | JSONB_TYPE_UINT16 => true,
        JSONB_TYPE_INT32 | JSONB_TYPE_UINT32 => large,
        _ => false,
    }
}

fn read_sized(cursor: &mut Cursor<&[u8]>, size: usize) -> Result<u64> {
    Ok(match size {
        2 => cursor.read_u16::<LittleEndian>().map_err(Error::Io)? as u64,
        4 => cursor.read_u32::<LittleEndian>().map_err(Error::Io)? as u64,
        _ => unreachable!("offset size is always 2 or 4"),
    })
}

/// MySQL's JSON binary format length-prefixes strings/opaque values with a
/// base-128 varint (high bit continues).
fn read_variable_length(cursor: &mut Cursor<&[u8]>) -> Result<usize> {
    let mut result: usize = 0;
    for shift in (0..).step_by(7) {
        let byte = cursor.read_u8().map_err(Error::Io)?;
        result |= ((byte & 0x7f) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        if shift > 28 {
            return Err(Error::CorruptRowImage("JSON variable-length integer too long".into()));
        }
    }
    Ok(result)
}

fn read_i16(body: &[u8]) -> Result<i16> {
    Cursor::new(body).read_i16::<LittleEndian>().map_err(Error::Io)
}
fn read_u16(body: &[u8]) -> Result<u16> {
    Cursor::new(body).read_u16::<LittleEndian>().map_err(Error::Io)
}
fn read_i32(body: &[u8]) -> Result<i32> {
    Cursor::new(body).read_i32::<LittleEndian>().map_err(Error::Io)
}
fn read_u32(body: &[u8]) -> Result<u32> {
    Cursor::new(body).read_u32::<LittleEndian>().map_err(Error::Io)
}
fn read_i64(body: &[u8]) -> Result<i64> {
    Cursor::new(body).read_i64::<LittleEndian>().map_err(Error::Io)
}
fn read_u64(body: &[u8]) -> Result<u64> {
    Cursor::new(body).read_u64::<LittleEndian>().map_err(Error::Io)
}

fn format_double(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{:.1}", v)
    } else {
        v.to_string()
    }
}

fn write_json_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_literal_null_true_false() {
        assert_eq!(decode(&[JSONB_TYPE_LITERAL, LITERAL_NULL]).unwrap(), "null");
        assert_eq!(decode(&[JSONB_TYPE_LITERAL, LITERAL_TRUE]).unwrap(), "true");
        assert_eq!(decode(&[JSONB_TYPE_LITERAL, LITERAL_FALSE]).unwrap(), "false");
    }

    #[test]
    fn decodes_int32_scalar() {
        let mut bytes = vec![JSONB_TYPE_INT32];
        bytes.extend_from_slice(&42i32.to_le_bytes());
        assert_eq!(decode(&bytes).unwrap(), "42");
    }

    #[test]
    fn decodes_small_object_with_string_value() {
        // {"a": 1} hand-assembled per the small-object layout.
        let key = b"a";
        let value_type = JSONB_TYPE_INT16;
        let mut body = Vec::new();
        body.extend_from_slice(&1u16.to_le_bytes()); // element count
        // header size placeholder, fixed up below
        let header_size_pos = body.len();
        body.extend_from_slice(&0u16.to_le_bytes());
        let key_offset_pos = body.len();
        body.extend_from_slice(&0u16.to_le_bytes()); // key offset (fixed up)
        body.extend_from_slice(&(key.len() as u16).to_le_bytes()); // key length
        body.push(value_type);
        body.extend_from_slice(&1i16.to_le_bytes()); // inline int16 value

        let key_offset = body.len() as u16;
        body.extend_from_slice(key);

        let total_size = body.len() as u16;
        body[header_size_pos..header_size_pos + 2].copy_from_slice(&total_size.to_le_bytes());
        body[key_offset_pos..key_offset_pos + 2].copy_from_slice(&key_offset.to_le_bytes());

        let mut doc = vec![JSONB_TYPE_SMALL_OBJECT];
        doc.extend_from_slice(&body);

        assert_eq!(decode(&doc).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn rejects_unknown_type_byte() {
        assert!(decode(&[0xEE]).is_err());
    }
}
