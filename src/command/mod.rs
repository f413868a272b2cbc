//! Client/server capability negotiation, command byte codes, and the
//! MySQL column type catalogue (§2, §4.2, §4.5).
//!
//! Grounded on the teacher's `CLIENT_*`/`MYSQL_TYPE_*` constant lists
//! (`src/command/client.rs`, `src/command/event.rs`), redone as a typed
//! `bitflags!` set and `enum` rather than loose `u32`/`u8` constants, in the
//! style `sqlx-mysql` uses for the same concern.

pub mod auth;
pub mod connection;

use bitflags::bitflags;

bitflags! {
    /// Client/server capability flags exchanged during the handshake (§2).
    #[derive(Default)]
    pub struct CapabilityFlags: u32 {
        const CLIENT_LONG_PASSWORD                  = 0x0000_0001;
        const CLIENT_FOUND_ROWS                      = 0x0000_0002;
        const CLIENT_LONG_FLAG                        = 0x0000_0004;
        const CLIENT_CONNECT_WITH_DB                  = 0x0000_0008;
        const CLIENT_NO_SCHEMA                        = 0x0000_0010;
        const CLIENT_COMPRESS                         = 0x0000_0020;
        const CLIENT_ODBC                             = 0x0000_0040;
        const CLIENT_LOCAL_FILES                      = 0x0000_0080;
        const CLIENT_IGNORE_SPACE                     = 0x0000_0100;
        const CLIENT_PROTOCOL_41                      = 0x0000_0200;
        const CLIENT_INTERACTIVE                      = 0x0000_0400;
        const CLIENT_SSL                              = 0x0000_0800;
        const CLIENT_IGNORE_SIGPIPE                   = 0x0000_1000;
        const CLIENT_TRANSACTIONS                     = 0x0000_2000;
        const CLIENT_RESERVED                         = 0x0000_4000;
        const CLIENT_SECURE_CONNECTION                = 0x0000_8000;
        const CLIENT_MULTI_STATEMENTS                 = 0x0001_0000;
        const CLIENT_MULTI_RESULTS                    = 0x0002_0000;
        const CLIENT_PS_MULTI_RESULTS                 = 0x0004_0000;
        const CLIENT_PLUGIN_AUTH                      = 0x0008_0000;
        const CLIENT_CONNECT_ATTRS                    = 0x0010_0000;
        const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA   = 0x0020_0000;
        const CLIENT_CAN_HANDLE_EXPIRED_PASSWORDS     = 0x0040_0000;
        const CLIENT_SESSION_TRACK                    = 0x0080_0000;
        const CLIENT_DEPRECATE_EOF                    = 0x0100_0000;
    }
}

impl CapabilityFlags {
    /// The capability set this crate negotiates as a client by default
    /// (§2): protocol 4.1, secure connection, plugin auth, multi-results,
    /// transactions, deprecated EOF markers.
    pub fn default_client() -> Self {
        Self::CLIENT_LONG_PASSWORD
            | Self::CLIENT_PROTOCOL_41
            | Self::CLIENT_SECURE_CONNECTION
            | Self::CLIENT_PLUGIN_AUTH
            | Self::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
            | Self::CLIENT_TRANSACTIONS
            | Self::CLIENT_MULTI_RESULTS
            | Self::CLIENT_MULTI_STATEMENTS
            | Self::CLIENT_DEPRECATE_EOF
    }
}

/// Command byte codes for `COM_*` client requests (§2, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Sleep = 0x00,
    Quit = 0x01,
    InitDb = 0x02,
    Query = 0x03,
    FieldList = 0x04,
    CreateDb = 0x05,
    DropDb = 0x06,
    Refresh = 0x07,
    Shutdown = 0x08,
    Statistics = 0x09,
    ProcessInfo = 0x0A,
    Connect = 0x0B,
    ProcessKill = 0x0C,
    Debug = 0x0D,
    Ping = 0x0E,
    Time = 0x0F,
    DelayedInsert = 0x10,
    ChangeUser = 0x11,
    BinlogDump = 0x12,
    TableDump = 0x13,
    ConnectOut = 0x14,
    RegisterSlave = 0x15,
    StmtPrepare = 0x16,
    StmtExecute = 0x17,
    StmtSendLongData = 0x18,
    StmtClose = 0x19,
    StmtReset = 0x1A,
    SetOption = 0x1B,
    StmtFetch = 0x1C,
    Daemon = 0x1D,
    BinlogDumpGtid = 0x1E,
    ResetConnection = 0x1F,
}

/// Response marker bytes distinguishing OK/ERR/EOF packets from ordinary
/// result-set rows (§2).
pub mod marker {
    pub const OK: u8 = 0x00;
    pub const EOF: u8 = 0xFE;
    pub const ERR: u8 = 0xFF;
    pub const LOCAL_INFILE: u8 = 0xFB;
}

/// MySQL column type codes as they appear on the wire, both in result-set
/// field definitions and in `TABLE_MAP_EVENT` column-type arrays (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ColumnType {
    Decimal = 0x00,
    Tiny = 0x01,
    Short = 0x02,
    Long = 0x03,
    Float = 0x04,
    Double = 0x05,
    Null = 0x06,
    Timestamp = 0x07,
    LongLong = 0x08,
    Int24 = 0x09,
    Date = 0x0A,
    Time = 0x0B,
    DateTime = 0x0C,
    Year = 0x0D,
    NewDate = 0x0E,
    VarChar = 0x0F,
    Bit = 0x10,
    Timestamp2 = 0x11,
    DateTime2 = 0x12,
    Time2 = 0x13,
    Json = 0xF5,
    NewDecimal = 0xF6,
    Enum = 0xF7,
    Set = 0xF8,
    TinyBlob = 0xF9,
    MediumBlob = 0xFA,
    LongBlob = 0xFB,
    Blob = 0xFC,
    VarString = 0xFD,
    String = 0xFE,
    Geometry = 0xFF,
}

impl ColumnType {
    pub fn from_u8(v: u8) -> Option<Self> {
        use ColumnType::*;
        Some(match v {
            0x00 => Decimal,
            0x01 => Tiny,
            0x02 => Short,
            0x03 => Long,
            0x04 => Float,
            0x05 => Double,
            0x06 => Null,
            0x07 => Timestamp,
            0x08 => LongLong,
            0x09 => Int24,
            0x0A => Date,
            0x0B => Time,
            0x0C => DateTime,
            0x0D => Year,
            0x0E => NewDate,
            0x0F => VarChar,
            0x10 => Bit,
            0x11 => Timestamp2,
            0x12 => DateTime2,
            0x13 => Time2,
            0xF5 => Json,
            0xF6 => NewDecimal,
            0xF7 => Enum,
            0xF8 => Set,
            0xF9 => TinyBlob,
            0xFA => MediumBlob,
            0xFB => LongBlob,
            0xFC => Blob,
            0xFD => VarString,
            0xFE => String,
            0xFF => Geometry,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_client_capabilities_include_protocol_41_and_secure_connection() {
        let caps = CapabilityFlags::default_client();
        assert!(caps.contains(CapabilityFlags::CLIENT_PROTOCOL_41));
        assert!(caps.contains(CapabilityFlags::CLIENT_SECURE_CONNECTION));
        assert!(caps.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH));
        assert!(!caps.contains(CapabilityFlags::CLIENT_SSL));
    }

    #[test]
    fn column_type_round_trips_through_from_u8() {
        assert_eq!(ColumnType::from_u8(0xF6), Some(ColumnType::NewDecimal));
        assert_eq!(ColumnType::from_u8(0x0C), Some(ColumnType::DateTime));
        assert_eq!(ColumnType::from_u8(0x02), Some(ColumnType::Short));
        assert_eq!(ColumnType::from_u8(0xAB), None);
    }
}
