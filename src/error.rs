use std::io;

/// The crate-wide error type. Every fallible public operation returns
/// `Result<T, Error>`.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("unsupported authentication plugin: {0}")]
    UnsupportedAuthPlugin(String),

    #[error("tls error: {0}")]
    Tls(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("server error {code} ({sqlstate}): {message}")]
    Server {
        code: u16,
        sqlstate: String,
        message: String,
    },

    #[error("checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    Checksum { expected: u32, computed: u32 },

    #[error("missing table map for table_id {0}")]
    MissingTableMap(u64),

    #[error("corrupt row image: {0}")]
    CorruptRowImage(String),

    #[error("unsupported event type {0}")]
    UnsupportedEvent(u8),

    #[error("invalid gtid set: {0}")]
    GtidParse(String),

    #[error("operation canceled")]
    Canceled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the syncer should treat this error as transient and attempt a
    /// reconnect (§7 propagation policy), as opposed to surfacing it as a
    /// terminal error on the streamer.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Server { .. })
    }
}
