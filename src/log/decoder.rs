//! Top-level binlog event decoding (§4.4): checksum verification, common
//! header parsing, and dispatch by type code.
//!
//! Grounded on the teacher's `LogDecoder::decode`/`decode_event`, rebuilt
//! around the new `Event` tagged enum, real `FormatDescription`/
//! `TableMapCache` state, and `crc`-crate checksum verification (the
//! teacher never actually implements checksum checking despite carrying
//! a `checksum_alg` field through every event header).

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use crc::{Crc, CRC_32_ISO_HDLC};

use crate::error::{Error, Result};
use crate::gtid::mariadb_gtid::MariadbGtid;
use crate::log::event::*;
use crate::log::format_description::{ChecksumAlgorithm, FormatDescription};
use crate::log::row_decoder;
use crate::log::table_map::{TableMap, TableMapCache};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Mutable state carried across a stream's events: the cached format
/// description and the live table-map cache (§3: both valid for the life
/// of the connection, reset on reconnect).
#[derive(Debug, Clone)]
pub struct DecoderState {
    pub format_description: FormatDescription,
    pub table_maps: TableMapCache,
    pub lax_decoding: bool,
    pub parse_time: bool,
    pub use_decimal: bool,
    /// §6 `verify_checksum`: when false, CRC32-checksummed events are
    /// still stripped of their trailing 4 bytes but never verified.
    pub verify_checksum: bool,
}

impl DecoderState {
    pub fn new(lax_decoding: bool) -> Self {
        Self::with_options(lax_decoding, false, false)
    }

    /// Like `new`, also setting the row-decode temporal/decimal mode (§6).
    pub fn with_options(lax_decoding: bool, parse_time: bool, use_decimal: bool) -> Self {
        DecoderState {
            format_description: FormatDescription::unknown(),
            table_maps: TableMapCache::new(),
            lax_decoding,
            parse_time,
            use_decimal,
            verify_checksum: true,
        }
    }
}

/// Decodes one complete event, including its 19-byte common header,
/// verifying the checksum when the cached FDE says CRC32 is in use, and
/// mutating `state`'s FDE/table-map caches as a side effect of
/// `FORMAT_DESCRIPTION_EVENT`/`TABLE_MAP_EVENT`/`ROTATE_EVENT` (§4.4 step 3).
pub fn parse(bytes: &[u8], state: &mut DecoderState) -> Result<DecodedEvent> {
    let header = EventHeader::parse(bytes)?;

    let body_with_checksum = &bytes[COMMON_HEADER_LENGTH..];
    let body = match state.format_description.checksum_algorithm {
        ChecksumAlgorithm::Crc32 if state.verify_checksum => verify_and_strip_checksum(bytes, body_with_checksum)?,
        ChecksumAlgorithm::Crc32 => strip_checksum(body_with_checksum)?,
        ChecksumAlgorithm::None => body_with_checksum,
    };

    let event = decode_body(header.event_type, body, state)?;
    Ok(DecodedEvent { header, event })
}

fn strip_checksum(body_with_checksum: &[u8]) -> Result<&[u8]> {
    if body_with_checksum.len() < 4 {
        return Err(Error::Protocol("event too short to carry a CRC32 checksum".into()));
    }
    Ok(&body_with_checksum[..body_with_checksum.len() - 4])
}

fn verify_and_strip_checksum<'a>(whole_event: &[u8], body_with_checksum: &'a [u8]) -> Result<&'a [u8]> {
    if body_with_checksum.len() < 4 {
        return Err(Error::Protocol("event too short to carry a CRC32 checksum".into()));
    }
    let split = body_with_checksum.len() - 4;
    let (body, checksum_bytes) = body_with_checksum.split_at(split);
    let expected = u32::from_le_bytes(checksum_bytes.try_into().unwrap());
    let computed = CRC32.checksum(&whole_event[..COMMON_HEADER_LENGTH + split]);
    if expected != computed {
        return Err(Error::Checksum { expected, computed });
    }
    Ok(body)
}

fn decode_body(event_type: u8, body: &[u8], state: &mut DecoderState) -> Result<Event> {
    match event_type {
        FORMAT_DESCRIPTION_EVENT => {
            let fde = FormatDescription::parse(body)?;
            state.format_description = fde.clone();
            Ok(Event::FormatDescription(fde))
        }
        ROTATE_EVENT => {
            let rotate = parse_rotate(body)?;
            state.table_maps.reset();
            Ok(Event::Rotate(rotate))
        }
        TABLE_MAP_EVENT => {
            let post_header_len = state.format_description.post_header_length(TABLE_MAP_EVENT);
            let table_map = TableMap::parse(body, post_header_len)?;
            state.table_maps.insert(table_map.clone());
            Ok(Event::TableMap(table_map))
        }
        WRITE_ROWS_EVENT | WRITE_ROWS_EVENT_V1 => {
            decode_rows(event_type, body, state, event_type == WRITE_ROWS_EVENT).map(Event::WriteRows)
        }
        UPDATE_ROWS_EVENT | UPDATE_ROWS_EVENT_V1 => {
            decode_rows(event_type, body, state, event_type == UPDATE_ROWS_EVENT).map(Event::UpdateRows)
        }
        DELETE_ROWS_EVENT | DELETE_ROWS_EVENT_V1 => {
            decode_rows(event_type, body, state, event_type == DELETE_ROWS_EVENT).map(Event::DeleteRows)
        }
        QUERY_EVENT => parse_query(body).map(Event::Query),
        XID_EVENT => {
            if body.len() < 8 {
                return Err(Error::Protocol("XID event shorter than 8 bytes".into()));
            }
            Ok(Event::Xid(XidEvent { xid: u64::from_le_bytes(body[..8].try_into().unwrap()) }))
        }
        GTID_LOG_EVENT | ANONYMOUS_GTID_LOG_EVENT => parse_mysql_gtid(body).map(Event::MysqlGtid),
        MARIADB_GTID_EVENT => parse_mariadb_gtid(body).map(|g| Event::MariadbGtid(MariadbGtidEvent(g))),
        PREVIOUS_GTIDS_LOG_EVENT | MARIADB_GTID_LIST_EVENT => {
            Ok(Event::PreviousGtids(PreviousGtidsEvent { raw_gtid_set: body.to_vec() }))
        }
        INTVAR_EVENT => {
            if body.len() < 9 {
                return Err(Error::Protocol("INTVAR event shorter than 9 bytes".into()));
            }
            Ok(Event::Intvar(IntvarEvent {
                kind: body[0],
                value: u64::from_le_bytes(body[1..9].try_into().unwrap()),
            }))
        }
        RAND_EVENT => {
            if body.len() < 16 {
                return Err(Error::Protocol("RAND event shorter than 16 bytes".into()));
            }
            Ok(Event::Rand {
                seed1: u64::from_le_bytes(body[0..8].try_into().unwrap()),
                seed2: u64::from_le_bytes(body[8..16].try_into().unwrap()),
            })
        }
        USER_VAR_EVENT => parse_user_var(body).map(Event::UserVar),
        STOP_EVENT => Ok(Event::Stop),
        INCIDENT_EVENT => parse_incident(body).map(Event::Incident),
        ROWS_QUERY_LOG_EVENT => {
            // 1-byte ignored length prefix, then the raw query text.
            let query = String::from_utf8_lossy(body.get(1..).unwrap_or(&[])).into_owned();
            Ok(Event::RowsQuery(RowsQueryEvent { query }))
        }
        HEARTBEAT_LOG_EVENT => Ok(Event::Heartbeat),
        other => {
            if state.lax_decoding {
                log::warn!("lax_decoding: delivering unrecognized event type {other} as opaque");
                Ok(Event::Unknown { event_type: other, body: body.to_vec() })
            } else {
                Err(Error::UnsupportedEvent(other))
            }
        }
    }
}

fn decode_rows(
    event_type: u8,
    body: &[u8],
    state: &DecoderState,
    is_update: bool,
) -> Result<row_decoder::RowsEvent> {
    let post_header_len = state.format_description.post_header_length(event_type);
    let is_v2 = matches!(event_type, WRITE_ROWS_EVENT | UPDATE_ROWS_EVENT | DELETE_ROWS_EVENT);
    let table_id = peek_table_id(body, post_header_len)?;
    let table_map = state.table_maps.get(table_id)?;
    let options = row_decoder::RowDecodeOptions {
        lax_decoding: state.lax_decoding,
        parse_time: state.parse_time,
        use_decimal: state.use_decimal,
    };
    row_decoder::decode_rows_event(body, table_map, post_header_len, is_update, is_v2, options)
}

fn peek_table_id(body: &[u8], post_header_len: u8) -> Result<u64> {
    let mut cursor = Cursor::new(body);
    if post_header_len == 6 {
        Ok(cursor.read_u32::<LittleEndian>()? as u64)
    } else {
        let mut buf = [0u8; 6];
        cursor.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes([buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], 0, 0]))
    }
}

fn parse_rotate(body: &[u8]) -> Result<RotateEvent> {
    if body.len() < 8 {
        return Err(Error::Protocol("ROTATE event shorter than 8 bytes".into()));
    }
    Ok(RotateEvent {
        next_position: u64::from_le_bytes(body[0..8].try_into().unwrap()),
        next_filename: String::from_utf8_lossy(&body[8..]).into_owned(),
    })
}

fn parse_query(body: &[u8]) -> Result<QueryEvent> {
    let mut cursor = Cursor::new(body);
    let thread_id = cursor.read_u32::<LittleEndian>()?;
    let execution_time = cursor.read_u32::<LittleEndian>()?;
    let schema_len = cursor.read_u8()? as usize;
    let error_code = cursor.read_u16::<LittleEndian>()?;
    let status_vars_len = cursor.read_u16::<LittleEndian>()? as usize;

    let mut status_vars = vec![0u8; status_vars_len];
    cursor.read_exact(&mut status_vars)?;

    let mut schema_bytes = vec![0u8; schema_len];
    cursor.read_exact(&mut schema_bytes)?;
    cursor.set_position(cursor.position() + 1); // trailing NUL after schema

    let mut query_bytes = Vec::new();
    cursor.read_to_end(&mut query_bytes)?;

    Ok(QueryEvent {
        thread_id,
        execution_time,
        error_code,
        schema: String::from_utf8_lossy(&schema_bytes).into_owned(),
        status_vars,
        query: String::from_utf8_lossy(&query_bytes).into_owned(),
    })
}

fn parse_mysql_gtid(body: &[u8]) -> Result<MysqlGtidEvent> {
    if body.len() < 25 {
        return Err(Error::Protocol("GTID event shorter than 25 bytes".into()));
    }
    let commit_flag = body[0] != 0;
    let source_uuid = uuid::Uuid::from_slice(&body[1..17])
        .map_err(|e| Error::Protocol(format!("invalid GTID source uuid: {e}")))?;
    let gno = u64::from_le_bytes(body[17..25].try_into().unwrap());
    Ok(MysqlGtidEvent { commit_flag, source_uuid, gno })
}

fn parse_mariadb_gtid(body: &[u8]) -> Result<MariadbGtid> {
    if body.len() < 16 {
        return Err(Error::Protocol("MariaDB GTID event shorter than 16 bytes".into()));
    }
    let seq_no = u64::from_le_bytes(body[0..8].try_into().unwrap());
    let domain_id = u32::from_le_bytes(body[8..12].try_into().unwrap());
    // server_id is carried in the common header, not the body; callers
    // that need it can overlay it from `EventHeader::server_id`.
    Ok(MariadbGtid { domain_id, server_id: 0, seq_no })
}

fn parse_user_var(body: &[u8]) -> Result<UserVarEvent> {
    let mut cursor = Cursor::new(body);
    let name_len = cursor.read_u32::<LittleEndian>()? as usize;
    let mut name_bytes = vec![0u8; name_len];
    cursor.read_exact(&mut name_bytes)?;
    let is_null = cursor.read_u8()?;

    let value = if is_null != 0 {
        None
    } else {
        let value_type = cursor.read_u8()?;
        let charset = cursor.read_u32::<LittleEndian>()?;
        let value_len = cursor.read_u32::<LittleEndian>()? as usize;
        Some(match value_type {
            0 => UserVarValue::String { charset, bytes: read_n(&mut cursor, value_len)? },
            1 => UserVarValue::Real(cursor.read_f64::<LittleEndian>()?),
            2 => UserVarValue::Int(cursor.read_i64::<LittleEndian>()?),
            4 => UserVarValue::Decimal(String::from_utf8_lossy(&read_n(&mut cursor, value_len)?).into_owned()),
            other => return Err(Error::Protocol(format!("unknown USER_VAR value type {other}"))),
        })
    };

    Ok(UserVarEvent { name: String::from_utf8_lossy(&name_bytes).into_owned(), value })
}

fn read_n(cursor: &mut Cursor<&[u8]>, n: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    cursor.read_exact(&mut buf)?;
    Ok(buf)
}

fn parse_incident(body: &[u8]) -> Result<IncidentEvent> {
    let mut cursor = Cursor::new(body);
    let kind = cursor.read_u16::<LittleEndian>()?;
    let msg_len = cursor.read_u8()? as usize;
    let mut msg = vec![0u8; msg_len];
    cursor.read_exact(&mut msg)?;
    Ok(IncidentEvent { kind, message: String::from_utf8_lossy(&msg).into_owned() })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn common_header(event_type: u8, event_size: u32) -> Vec<u8> {
        let mut header = Vec::new();
        header.extend_from_slice(&0u32.to_le_bytes()); // timestamp
        header.push(event_type);
        header.extend_from_slice(&1u32.to_le_bytes()); // server_id
        header.extend_from_slice(&event_size.to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes()); // log_pos
        header.extend_from_slice(&0u16.to_le_bytes()); // flags
        header
    }

    #[test]
    fn parses_xid_event_without_checksum() {
        let mut state = DecoderState::new(false);
        let mut event = common_header(XID_EVENT, 27);
        event.extend_from_slice(&42u64.to_le_bytes());
        let decoded = parse(&event, &mut state).unwrap();
        assert!(matches!(decoded.event, Event::Xid(XidEvent { xid: 42 })));
    }

    #[test]
    fn unsupported_event_fails_strict_by_default() {
        let mut state = DecoderState::new(false);
        let event = common_header(200, 19);
        let err = parse(&event, &mut state).unwrap_err();
        assert!(matches!(err, Error::UnsupportedEvent(200)));
    }

    #[test]
    fn unsupported_event_is_delivered_opaque_with_lax_decoding() {
        let mut state = DecoderState::new(true);
        let event = common_header(200, 19);
        let decoded = parse(&event, &mut state).unwrap();
        assert!(matches!(decoded.event, Event::Unknown { event_type: 200, .. }));
    }

    #[test]
    fn rotate_event_resets_table_map_cache() {
        let mut state = DecoderState::new(false);
        state.table_maps.insert(TableMap {
            table_id: 1,
            schema: "s".into(),
            table: "t".into(),
            columns: Vec::new(),
        });
        let mut event = common_header(ROTATE_EVENT, 0);
        event.extend_from_slice(&4u64.to_le_bytes());
        event.extend_from_slice(b"mysql.000002");
        parse(&event, &mut state).unwrap();
        assert!(state.table_maps.get(1).is_err());
    }

    #[test]
    fn checksum_mismatch_is_detected() {
        let mut state = DecoderState::new(false);
        state.format_description.checksum_algorithm = ChecksumAlgorithm::Crc32;
        let mut event = common_header(XID_EVENT, 0);
        event.extend_from_slice(&42u64.to_le_bytes());
        event.extend_from_slice(&0xDEADBEEFu32.to_le_bytes()); // wrong checksum
        let err = parse(&event, &mut state).unwrap_err();
        assert!(matches!(err, Error::Checksum { .. }));
    }

    #[test]
    fn checksum_match_strips_trailing_four_bytes() {
        let mut state = DecoderState::new(false);
        state.format_description.checksum_algorithm = ChecksumAlgorithm::Crc32;
        let mut event = common_header(XID_EVENT, 0);
        event.extend_from_slice(&42u64.to_le_bytes());
        let checksum = CRC32.checksum(&event);
        event.extend_from_slice(&checksum.to_le_bytes());
        let decoded = parse(&event, &mut state).unwrap();
        assert!(matches!(decoded.event, Event::Xid(XidEvent { xid: 42 })));
    }

    #[test]
    fn verify_checksum_false_skips_verification_but_still_strips_bytes() {
        let mut state = DecoderState::new(false);
        state.format_description.checksum_algorithm = ChecksumAlgorithm::Crc32;
        state.verify_checksum = false;
        let mut event = common_header(XID_EVENT, 0);
        event.extend_from_slice(&42u64.to_le_bytes());
        event.extend_from_slice(&0xDEADBEEFu32.to_le_bytes()); // wrong, but unverified
        let decoded = parse(&event, &mut state).unwrap();
        assert!(matches!(decoded.event, Event::Xid(XidEvent { xid: 42 })));
    }
}
