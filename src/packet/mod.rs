//! Packet framing (§4.1): 3-byte little-endian length + 1-byte sequence
//! number + payload, with transparent reassembly/splitting of payloads that
//! cross the 2^24 - 1 byte boundary.
//!
//! Grounded on the teacher's `HeaderPacket`/`read_write_packet` shape, redone
//! over `byteorder::Cursor` instead of hand-rolled bit shifts.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

/// Payload length that signals "more fragments follow".
pub const MAX_PACKET_LENGTH: usize = 0xFF_FFFF; // 2^24 - 1

/// Reads one logical packet (reassembling fragments as needed) from `r`,
/// returning the payload and the sequence number of the *last* fragment
/// read (the sequence the caller should continue from).
pub fn read_packet<R: Read>(r: &mut R) -> Result<(Vec<u8>, u8)> {
    let mut payload = Vec::new();
    let mut expected_seq: Option<u8> = None;
    loop {
        let mut header = [0u8; 4];
        r.read_exact(&mut header)?;
        let len = (header[0] as usize) | ((header[1] as usize) << 8) | ((header[2] as usize) << 16);
        let seq = header[3];

        if let Some(exp) = expected_seq {
            if seq != exp {
                return Err(Error::Protocol(format!(
                    "packet sequence mismatch: expected {}, got {}",
                    exp, seq
                )));
            }
        }
        expected_seq = Some(seq.wrapping_add(1));

        let mut chunk = vec![0u8; len];
        r.read_exact(&mut chunk)?;
        payload.extend_from_slice(&chunk);

        if len < MAX_PACKET_LENGTH {
            return Ok((payload, seq));
        }
    }
}

/// Writes `payload` as one or more packets, starting at sequence number
/// `start_seq`. Returns the sequence number of the last fragment written
/// (the next command should start at `result + 1`).
pub fn write_packet<W: Write>(w: &mut W, payload: &[u8], start_seq: u8) -> Result<u8> {
    let mut seq = start_seq;
    let mut offset = 0;
    loop {
        let remaining = payload.len() - offset;
        let chunk_len = remaining.min(MAX_PACKET_LENGTH);
        let chunk = &payload[offset..offset + chunk_len];

        w.write_u8((chunk_len & 0xFF) as u8)?;
        w.write_u8(((chunk_len >> 8) & 0xFF) as u8)?;
        w.write_u8(((chunk_len >> 16) & 0xFF) as u8)?;
        w.write_u8(seq)?;
        w.write_all(chunk)?;

        offset += chunk_len;
        let is_last = chunk_len < MAX_PACKET_LENGTH;
        let last_seq = seq;
        seq = seq.wrapping_add(1);
        if is_last {
            w.flush()?;
            return Ok(last_seq);
        }
    }
}

/// Length-coded integer encoding width, keyed off the first byte (§4.1).
pub fn lenc_int_len(first_byte: u8) -> usize {
    match first_byte {
        0xFB => 1, // null marker, no trailing bytes
        0xFC => 3,
        0xFD => 4,
        0xFE => 9,
        _ => 1,
    }
}

/// Reads a length-coded integer. Returns `None` for the null marker
/// (`0xFB`).
pub fn read_lenc_int(cursor: &mut io::Cursor<&[u8]>) -> Result<Option<u64>> {
    let first = cursor.read_u8()?;
    match first {
        0xFB => Ok(None),
        n if n < 0xFB => Ok(Some(n as u64)),
        0xFC => Ok(Some(cursor.read_u16::<LittleEndian>()? as u64)),
        0xFD => Ok(Some(cursor.read_uint::<LittleEndian>(3)?)),
        0xFE => Ok(Some(cursor.read_u64::<LittleEndian>()?)),
        other => Err(Error::Protocol(format!("impossible lenc-int prefix {:#x}", other))),
    }
}

/// Encodes `value` as a length-coded integer.
pub fn write_lenc_int(out: &mut Vec<u8>, value: u64) {
    if value < 0xFB {
        out.push(value as u8);
    } else if value <= 0xFFFF {
        out.push(0xFC);
        out.extend_from_slice(&(value as u16).to_le_bytes());
    } else if value <= 0xFF_FFFF {
        out.push(0xFD);
        out.extend_from_slice(&(value as u32).to_le_bytes()[..3]);
    } else {
        out.push(0xFE);
        out.extend_from_slice(&value.to_le_bytes());
    }
}

/// Reads a length-coded string: a lenc-int length followed by that many
/// bytes. `None` represents SQL NULL (the `0xFB` marker).
pub fn read_lenc_string(cursor: &mut io::Cursor<&[u8]>) -> Result<Option<Vec<u8>>> {
    match read_lenc_int(cursor)? {
        None => Ok(None),
        Some(len) => {
            let mut buf = vec![0u8; len as usize];
            cursor.read_exact(&mut buf)?;
            Ok(Some(buf))
        }
    }
}

pub fn write_lenc_string(out: &mut Vec<u8>, bytes: &[u8]) {
    write_lenc_int(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

/// Reads bytes up to (and consuming) the next `0x00`.
pub fn read_null_terminated(cursor: &mut io::Cursor<&[u8]>) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let b = cursor.read_u8()?;
        if b == 0 {
            return Ok(out);
        }
        out.push(b);
    }
}

pub fn write_null_terminated(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(bytes);
    out.push(0);
}

/// Reads the remainder of the buffer as a fixed-length byte string.
pub fn read_fixed<'a>(cursor: &mut io::Cursor<&'a [u8]>, len: usize) -> Result<&'a [u8]> {
    let pos = cursor.position() as usize;
    let buf = *cursor.get_ref();
    if pos + len > buf.len() {
        return Err(Error::Protocol("buffer underrun reading fixed-length string".into()));
    }
    cursor.set_position((pos + len) as u64);
    Ok(&buf[pos..pos + len])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_small_packet() {
        let payload = b"select 1".to_vec();
        let mut buf = Vec::new();
        write_packet(&mut buf, &payload, 0).unwrap();
        let mut cursor = io::Cursor::new(buf.as_slice());
        let (decoded, seq) = read_packet(&mut cursor).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(seq, 0);
    }

    #[test]
    fn splits_and_reassembles_oversized_payload() {
        let payload = vec![0xABu8; MAX_PACKET_LENGTH + 123];
        let mut buf = Vec::new();
        let last_seq = write_packet(&mut buf, &payload, 5).unwrap();
        assert_eq!(last_seq, 6);
        let mut cursor = io::Cursor::new(buf.as_slice());
        let (decoded, seq) = read_packet(&mut cursor).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(seq, 6);
    }

    #[test]
    fn rejects_sequence_mismatch_mid_fragment() {
        let mut buf = Vec::new();
        // first fragment: max length, seq 0
        buf.push((MAX_PACKET_LENGTH & 0xFF) as u8);
        buf.push(((MAX_PACKET_LENGTH >> 8) & 0xFF) as u8);
        buf.push(((MAX_PACKET_LENGTH >> 16) & 0xFF) as u8);
        buf.push(0);
        buf.extend(vec![0u8; MAX_PACKET_LENGTH]);
        // second fragment: wrong sequence number (should be 1)
        buf.push(1);
        buf.push(0);
        buf.push(0);
        buf.push(5);
        buf.push(0xFF);

        let mut cursor = io::Cursor::new(buf.as_slice());
        let err = read_packet(&mut cursor).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn lenc_int_round_trips_across_all_widths() {
        for value in [0u64, 0xFA, 0xFB, 0xFC, 0x1234, 0xFFFF, 0x10000, 0xFF_FFFF, 0x1_0000_0000, u64::MAX] {
            let mut out = Vec::new();
            write_lenc_int(&mut out, value);
            let mut cursor = io::Cursor::new(out.as_slice());
            let decoded = read_lenc_int(&mut cursor).unwrap();
            assert_eq!(decoded, Some(value), "value={value:#x}");
        }
    }

    #[test]
    fn lenc_int_0xfc_example_from_spec() {
        let bytes = [0xFCu8, 0x34, 0x12];
        let mut cursor = io::Cursor::new(bytes.as_slice());
        let decoded = read_lenc_int(&mut cursor).unwrap();
        assert_eq!(decoded, Some(0x1234));

        let mut out = Vec::new();
        write_lenc_int(&mut out, 0x1234);
        assert_eq!(out, bytes);
    }

    #[test]
    fn lenc_int_null_marker() {
        let bytes = [0xFBu8];
        let mut cursor = io::Cursor::new(bytes.as_slice());
        assert_eq!(read_lenc_int(&mut cursor).unwrap(), None);
    }
}
