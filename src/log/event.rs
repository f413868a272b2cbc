//! Event type codes, the 19-byte common header, and the tagged `Event`
//! enum (§3, §4.4, §9: "tagged variant, not inheritance").
//!
//! The type codes are a direct port of the teacher's `src/command/event.rs`
//! constant list (itself a transliteration of MySQL's own `binlog_event.h`);
//! the struct shapes are new, since the teacher never actually builds typed
//! event values, only a `GtidLogEvent` stub carrying raw `sid`/`gno`.

use str_utils::StartsWithIgnoreCase;

use crate::gtid::mariadb_gtid::MariadbGtid;
use crate::log::row_decoder::RowsEvent;

pub const UNKNOWN_EVENT: u8 = 0;
pub const START_EVENT_V3: u8 = 1;
pub const QUERY_EVENT: u8 = 2;
pub const STOP_EVENT: u8 = 3;
pub const ROTATE_EVENT: u8 = 4;
pub const INTVAR_EVENT: u8 = 5;
pub const LOAD_EVENT: u8 = 6;
pub const SLAVE_EVENT: u8 = 7;
pub const CREATE_FILE_EVENT: u8 = 8;
pub const APPEND_BLOCK_EVENT: u8 = 9;
pub const EXEC_LOAD_EVENT: u8 = 10;
pub const DELETE_FILE_EVENT: u8 = 11;
pub const NEW_LOAD_EVENT: u8 = 12;
pub const RAND_EVENT: u8 = 13;
pub const USER_VAR_EVENT: u8 = 14;
pub const FORMAT_DESCRIPTION_EVENT: u8 = 15;
pub const XID_EVENT: u8 = 16;
pub const BEGIN_LOAD_QUERY_EVENT: u8 = 17;
pub const EXECUTE_LOAD_QUERY_EVENT: u8 = 18;
pub const TABLE_MAP_EVENT: u8 = 19;
pub const WRITE_ROWS_EVENT_V1: u8 = 23;
pub const UPDATE_ROWS_EVENT_V1: u8 = 24;
pub const DELETE_ROWS_EVENT_V1: u8 = 25;
pub const INCIDENT_EVENT: u8 = 26;
pub const HEARTBEAT_LOG_EVENT: u8 = 27;
pub const IGNORABLE_LOG_EVENT: u8 = 28;
pub const ROWS_QUERY_LOG_EVENT: u8 = 29;
pub const WRITE_ROWS_EVENT: u8 = 30;
pub const UPDATE_ROWS_EVENT: u8 = 31;
pub const DELETE_ROWS_EVENT: u8 = 32;
pub const GTID_LOG_EVENT: u8 = 33;
pub const ANONYMOUS_GTID_LOG_EVENT: u8 = 34;
pub const PREVIOUS_GTIDS_LOG_EVENT: u8 = 35;

/// MariaDB-specific event codes, disjoint from the MySQL range above
/// (MariaDB binlog.h `ANNOTATE_ROWS_EVENT` onward).
pub const MARIADB_ANNOTATE_ROWS_EVENT: u8 = 160;
pub const MARIADB_BINLOG_CHECKPOINT_EVENT: u8 = 161;
pub const MARIADB_GTID_EVENT: u8 = 162;
pub const MARIADB_GTID_LIST_EVENT: u8 = 163;

pub const COMMON_HEADER_LENGTH: usize = 19;

pub const EVENT_TYPE_OFFSET: usize = 4;
pub const SERVER_ID_OFFSET: usize = 5;
pub const EVENT_LEN_OFFSET: usize = 9;
pub const LOG_POS_OFFSET: usize = 13;
pub const FLAGS_OFFSET: usize = 17;

bitflags::bitflags! {
    /// Event header flags (§3); only the bits this crate acts on are named.
    pub struct EventFlags: u16 {
        const LOG_EVENT_THREAD_SPECIFIC = 0x0004;
        const LOG_EVENT_SUPPRESS_USE    = 0x0008;
        const LOG_EVENT_ARTIFICIAL      = 0x0020;
        const LOG_EVENT_RELAY_LOG       = 0x0040;
    }
}

/// The common 19-byte header prefixing every binlog event (§3).
#[derive(Debug, Clone, Copy)]
pub struct EventHeader {
    pub timestamp: u32,
    pub event_type: u8,
    pub server_id: u32,
    pub event_size: u32,
    pub log_pos: u32,
    pub flags: u16,
}

impl EventHeader {
    pub fn parse(bytes: &[u8]) -> crate::error::Result<Self> {
        if bytes.len() < COMMON_HEADER_LENGTH {
            return Err(crate::error::Error::Protocol("event shorter than common header".into()));
        }
        Ok(EventHeader {
            timestamp: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            event_type: bytes[4],
            server_id: u32::from_le_bytes(bytes[5..9].try_into().unwrap()),
            event_size: u32::from_le_bytes(bytes[9..13].try_into().unwrap()),
            log_pos: u32::from_le_bytes(bytes[13..17].try_into().unwrap()),
            flags: u16::from_le_bytes(bytes[17..19].try_into().unwrap()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct QueryEvent {
    pub thread_id: u32,
    pub execution_time: u32,
    pub error_code: u16,
    pub schema: String,
    pub status_vars: Vec<u8>,
    pub query: String,
}

impl QueryEvent {
    /// Case-insensitive statement classification (§4.4: "`BEGIN`, `COMMIT`,
    /// `SAVEPOINT`, and DDL strings flow through here"), in the style of
    /// the teacher's `LogEventParser`'s `starts_with_ignore_case` dispatch
    /// over `XA START`/`BEGIN`/`COMMIT`.
    pub fn is_begin(&self) -> bool {
        self.query.starts_with_ignore_case("BEGIN")
    }

    pub fn is_commit(&self) -> bool {
        self.query.starts_with_ignore_case("COMMIT")
    }

    pub fn is_savepoint(&self) -> bool {
        self.query.starts_with_ignore_case("SAVEPOINT")
    }

    pub fn is_xa_start(&self) -> bool {
        self.query.starts_with_ignore_case("XA START")
    }

    pub fn is_xa_end(&self) -> bool {
        self.query.starts_with_ignore_case("XA END")
    }

    pub fn is_xa_commit(&self) -> bool {
        self.query.starts_with_ignore_case("XA COMMIT")
    }

    pub fn is_xa_rollback(&self) -> bool {
        self.query.starts_with_ignore_case("XA ROLLBACK")
    }
}

#[derive(Debug, Clone)]
pub struct XidEvent {
    pub xid: u64,
}

#[derive(Debug, Clone)]
pub struct RotateEvent {
    pub next_position: u64,
    pub next_filename: String,
}

#[derive(Debug, Clone)]
pub struct IntvarEvent {
    pub kind: u8,
    pub value: u64,
}

#[derive(Debug, Clone)]
pub struct UserVarEvent {
    pub name: String,
    pub value: Option<UserVarValue>,
}

#[derive(Debug, Clone)]
pub enum UserVarValue {
    Int(i64),
    Real(f64),
    Decimal(String),
    String { charset: u32, bytes: Vec<u8> },
}

#[derive(Debug, Clone)]
pub struct MysqlGtidEvent {
    pub commit_flag: bool,
    pub source_uuid: uuid::Uuid,
    pub gno: u64,
}

#[derive(Debug, Clone)]
pub struct MariadbGtidEvent(pub MariadbGtid);

#[derive(Debug, Clone)]
pub struct PreviousGtidsEvent {
    pub raw_gtid_set: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct IncidentEvent {
    pub kind: u16,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct RowsQueryEvent {
    pub query: String,
}

/// One decoded binlog event (§9: tagged variant, dispatched on type code
/// rather than an inheritance hierarchy).
#[derive(Debug, Clone)]
pub enum Event {
    FormatDescription(super::format_description::FormatDescription),
    Query(QueryEvent),
    Xid(XidEvent),
    Rotate(RotateEvent),
    TableMap(super::table_map::TableMap),
    WriteRows(RowsEvent),
    UpdateRows(RowsEvent),
    DeleteRows(RowsEvent),
    MysqlGtid(MysqlGtidEvent),
    MariadbGtid(MariadbGtidEvent),
    PreviousGtids(PreviousGtidsEvent),
    Intvar(IntvarEvent),
    Rand { seed1: u64, seed2: u64 },
    UserVar(UserVarEvent),
    Stop,
    Incident(IncidentEvent),
    RowsQuery(RowsQueryEvent),
    Heartbeat,
    /// An event type not recognized by this crate. Carries the raw
    /// post-header+body so a lax consumer can still inspect it (§9).
    Unknown { event_type: u8, body: Vec<u8> },
}

/// A decoded event paired with the common header it was parsed from.
#[derive(Debug, Clone)]
pub struct DecodedEvent {
    pub header: EventHeader,
    pub event: Event,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(text: &str) -> QueryEvent {
        QueryEvent {
            thread_id: 1,
            execution_time: 0,
            error_code: 0,
            schema: "test".into(),
            status_vars: Vec::new(),
            query: text.into(),
        }
    }

    #[test]
    fn classifies_transaction_boundary_statements_case_insensitively() {
        assert!(query("BEGIN").is_begin());
        assert!(query("begin").is_begin());
        assert!(query("COMMIT /* xid */").is_commit());
        assert!(query("SAVEPOINT s1").is_savepoint());
        assert!(!query("CREATE TABLE t (id INT)").is_begin());
    }

    #[test]
    fn classifies_xa_statements() {
        assert!(query("XA START 'gtrid'").is_xa_start());
        assert!(query("XA END 'gtrid'").is_xa_end());
        assert!(query("xa commit 'gtrid'").is_xa_commit());
        assert!(query("XA ROLLBACK 'gtrid'").is_xa_rollback());
    }
}
