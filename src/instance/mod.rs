//! Binlog syncer (§4.6) and streamer (§4.7): the stateful client that owns
//! one replication connection, drives the dump loop on its own thread, and
//! hands decoded events to a consumer through a bounded queue.

pub mod streamer;
pub mod syncer;

pub use streamer::Streamer;
pub use syncer::{BinlogSyncer, Flavor, GtidSet, MasterPosition, SyncerConfig, TlsConfig};
