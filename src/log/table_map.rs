//! Table map cache (§3, §4.4): `TABLE_MAP_EVENT` establishes a per-table_id
//! column layout that row events reference by id for the rest of the
//! binlog file.
//!
//! The teacher's equivalent (`src/log/metadata.rs::TableMeta`/`FieldMeta`)
//! derives its column metadata from `SHOW CREATE TABLE` via `sql-parse`,
//! which is out of scope here (schema-management layer). This is instead
//! built straight from the wire layout of `TABLE_MAP_EVENT` itself, as
//! `rust-us-mysql-cdc-rs`'s row parser assumes when it looks up columns by
//! table_id.

use std::collections::HashMap;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::command::ColumnType;
use crate::error::{Error, Result};
use crate::packet;

/// A single column's type and width-dependent metadata, as carried by a
/// `TABLE_MAP_EVENT` (§3, §4.5).
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub column_type: ColumnType,
    /// Raw metadata bytes for this column (0, 1, or 2 bytes depending on
    /// type); interpretation is type-specific (precision/scale for
    /// NEWDECIMAL, string length for VARCHAR, etc).
    pub metadata: u16,
    pub nullable: bool,
}

#[derive(Debug, Clone)]
pub struct TableMap {
    pub table_id: u64,
    pub schema: String,
    pub table: String,
    pub columns: Vec<ColumnInfo>,
}

impl TableMap {
    /// Parses the body of a `TABLE_MAP_EVENT`. `post_header_len` (6 or 8,
    /// from the FDE) selects whether `table_id` is 4 or 6 bytes wide.
    pub fn parse(body: &[u8], post_header_len: u8) -> Result<Self> {
        let mut cursor = Cursor::new(body);
        let table_id = if post_header_len == 6 {
            cursor.read_u32::<LittleEndian>()? as u64
        } else {
            let mut buf = [0u8; 6];
            std::io::Read::read_exact(&mut cursor, &mut buf)?;
            u64::from_le_bytes([buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], 0, 0])
        };
        let _flags = cursor.read_u16::<LittleEndian>()?;

        let schema_len = cursor.read_u8()? as usize;
        let schema = read_fixed_string(&mut cursor, schema_len)?;
        cursor.set_position(cursor.position() + 1); // filler null byte

        let table_len = cursor.read_u8()? as usize;
        let table = read_fixed_string(&mut cursor, table_len)?;
        cursor.set_position(cursor.position() + 1);

        let column_count = packet::read_lenc_int(&mut cursor)?.unwrap_or(0) as usize;
        let mut type_codes = vec![0u8; column_count];
        std::io::Read::read_exact(&mut cursor, &mut type_codes)?;

        let metadata_bytes = packet::read_lenc_string(&mut cursor)?.unwrap_or_default();
        let metadata = parse_metadata(&type_codes, &metadata_bytes)?;

        let null_bitmap_len = (column_count + 7) / 8;
        let mut null_bitmap = vec![0u8; null_bitmap_len];
        if std::io::Read::read_exact(&mut cursor, &mut null_bitmap).is_err() {
            // some servers omit the null-bitmap on the final column map of
            // a zero-column edge case; treat all columns as non-nullable.
            null_bitmap = vec![0u8; null_bitmap_len];
        }

        let mut columns = Vec::with_capacity(column_count);
        for (i, &raw_type) in type_codes.iter().enumerate() {
            let column_type = ColumnType::from_u8(raw_type)
                .ok_or_else(|| Error::Protocol(format!("unknown column type code {raw_type:#x}")))?;
            let nullable = (null_bitmap[i / 8] >> (i % 8)) & 1 == 1;
            columns.push(ColumnInfo {
                column_type,
                metadata: metadata[i],
                nullable,
            });
        }

        Ok(TableMap { table_id, schema, table, columns })
    }
}

fn read_fixed_string(cursor: &mut Cursor<&[u8]>, len: usize) -> Result<String> {
    let bytes = packet::read_fixed(cursor, len)?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

/// Metadata byte widths vary by column type (§4.5); this mirrors MySQL's
/// `Table_map_log_event::save_column_metadata` of which bytes are present.
fn parse_metadata(type_codes: &[u8], metadata_bytes: &[u8]) -> Result<Vec<u16>> {
    let mut cursor = Cursor::new(metadata_bytes);
    let mut out = Vec::with_capacity(type_codes.len());
    for &raw_type in type_codes {
        let column_type = ColumnType::from_u8(raw_type)
            .ok_or_else(|| Error::Protocol(format!("unknown column type code {raw_type:#x}")))?;
        let meta = match column_type {
            ColumnType::Decimal
            | ColumnType::Tiny
            | ColumnType::Short
            | ColumnType::Long
            | ColumnType::Float
            | ColumnType::Double
            | ColumnType::Timestamp
            | ColumnType::LongLong
            | ColumnType::Int24
            | ColumnType::Date
            | ColumnType::Time
            | ColumnType::DateTime
            | ColumnType::Year
            | ColumnType::NewDate
            | ColumnType::Null => 0,
            ColumnType::NewDecimal | ColumnType::String | ColumnType::Enum | ColumnType::Set => {
                cursor.read_u16::<LittleEndian>()?
            }
            ColumnType::VarChar | ColumnType::Bit | ColumnType::VarString => cursor.read_u16::<LittleEndian>()?,
            ColumnType::Timestamp2 | ColumnType::DateTime2 | ColumnType::Time2 => cursor.read_u8()? as u16,
            ColumnType::TinyBlob
            | ColumnType::MediumBlob
            | ColumnType::LongBlob
            | ColumnType::Blob
            | ColumnType::Json
            | ColumnType::Geometry => cursor.read_u8()? as u16,
        };
        out.push(meta);
    }
    Ok(out)
}

/// The live cache of table maps keyed by `table_id` (§3: "valid until the
/// next ROTATE_EVENT or a replacing TABLE_MAP_EVENT with the same id").
#[derive(Debug, Clone, Default)]
pub struct TableMapCache {
    tables: HashMap<u64, TableMap>,
}

impl TableMapCache {
    pub fn new() -> Self {
        TableMapCache { tables: HashMap::new() }
    }

    pub fn insert(&mut self, table_map: TableMap) {
        self.tables.insert(table_map.table_id, table_map);
    }

    pub fn get(&self, table_id: u64) -> Result<&TableMap> {
        self.tables.get(&table_id).ok_or(Error::MissingTableMap(table_id))
    }

    pub fn reset(&mut self) {
        self.tables.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table_map_body() -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&7u32.to_le_bytes()); // table_id (post_header_len 6)
        body.extend_from_slice(&0u16.to_le_bytes()); // flags
        body.push(4); // schema len
        body.extend_from_slice(b"test");
        body.push(0);
        body.push(1); // table len
        body.extend_from_slice(b"t");
        body.push(0);
        packet::write_lenc_int(&mut body, 2); // column count
        body.push(ColumnType::Long as u8);
        body.push(ColumnType::VarChar as u8);
        let mut metadata = Vec::new();
        metadata.extend_from_slice(&10u16.to_le_bytes()); // varchar max length
        packet::write_lenc_string(&mut body, &metadata);
        body.push(0b00); // null bitmap, no nullable columns
        body
    }

    #[test]
    fn parses_schema_table_and_column_types() {
        let table_map = TableMap::parse(&sample_table_map_body(), 6).unwrap();
        assert_eq!(table_map.table_id, 7);
        assert_eq!(table_map.schema, "test");
        assert_eq!(table_map.table, "t");
        assert_eq!(table_map.columns.len(), 2);
        assert_eq!(table_map.columns[0].column_type, ColumnType::Long);
        assert_eq!(table_map.columns[1].column_type, ColumnType::VarChar);
        assert_eq!(table_map.columns[1].metadata, 10);
        assert!(!table_map.columns[0].nullable);
    }

    #[test]
    fn cache_reset_drops_all_entries_on_rotate() {
        let mut cache = TableMapCache::new();
        cache.insert(TableMap::parse(&sample_table_map_body(), 6).unwrap());
        assert!(cache.get(7).is_ok());
        cache.reset();
        assert!(cache.get(7).is_err());
    }

    #[test]
    fn missing_table_id_is_an_error() {
        let cache = TableMapCache::new();
        assert!(matches!(cache.get(99), Err(Error::MissingTableMap(99))));
    }
}
