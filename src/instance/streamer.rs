//! The bounded queue between a `BinlogSyncer`'s read loop and its consumer
//! (§4.7, §5). Producer and consumer are split into two handles sharing an
//! `Arc<Shared>`; the channel itself is a `std::sync::mpsc::sync_channel`,
//! matching the teacher's blocking-socket, thread-per-connection style
//! rather than reaching for an async runtime or a crate like `crossbeam`.
//!
//! A terminal close (clean cancellation or a fatal error) is recorded in a
//! `Mutex`-guarded flag alongside the channel; `Error` is not `Clone`, so
//! the flag stores a lightweight reconstructible `TerminalKind` and
//! `next()` rebuilds an equivalent `Error` on every call after close.

use std::io;
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::Error;
use crate::log::event::DecodedEvent;

#[derive(Debug, Clone)]
enum TerminalKind {
    Canceled,
    Auth(String),
    UnsupportedAuthPlugin(String),
    Tls(String),
    Io(io::ErrorKind, String),
    Server { code: u16, sqlstate: String, message: String },
    Checksum { expected: u32, computed: u32 },
    MissingTableMap(u64),
    CorruptRowImage(String),
    UnsupportedEvent(u8),
    GtidParse(String),
    Protocol(String),
}

impl TerminalKind {
    fn from_error(e: &Error) -> Self {
        match e {
            Error::Canceled | Error::DeadlineExceeded => TerminalKind::Canceled,
            Error::Auth(m) => TerminalKind::Auth(m.clone()),
            Error::UnsupportedAuthPlugin(m) => TerminalKind::UnsupportedAuthPlugin(m.clone()),
            Error::Tls(m) => TerminalKind::Tls(m.clone()),
            Error::Io(io_err) => TerminalKind::Io(io_err.kind(), io_err.to_string()),
            Error::Server { code, sqlstate, message } => TerminalKind::Server {
                code: *code,
                sqlstate: sqlstate.clone(),
                message: message.clone(),
            },
            Error::Checksum { expected, computed } => TerminalKind::Checksum { expected: *expected, computed: *computed },
            Error::MissingTableMap(id) => TerminalKind::MissingTableMap(*id),
            Error::CorruptRowImage(m) => TerminalKind::CorruptRowImage(m.clone()),
            Error::UnsupportedEvent(t) => TerminalKind::UnsupportedEvent(*t),
            Error::GtidParse(m) => TerminalKind::GtidParse(m.clone()),
            Error::Protocol(m) => TerminalKind::Protocol(m.clone()),
        }
    }

    fn into_error(self) -> Error {
        match self {
            TerminalKind::Canceled => Error::Canceled,
            TerminalKind::Auth(m) => Error::Auth(m),
            TerminalKind::UnsupportedAuthPlugin(m) => Error::UnsupportedAuthPlugin(m),
            TerminalKind::Tls(m) => Error::Tls(m),
            TerminalKind::Io(kind, m) => Error::Io(io::Error::new(kind, m)),
            TerminalKind::Server { code, sqlstate, message } => Error::Server { code, sqlstate, message },
            TerminalKind::Checksum { expected, computed } => Error::Checksum { expected, computed },
            TerminalKind::MissingTableMap(id) => Error::MissingTableMap(id),
            TerminalKind::CorruptRowImage(m) => Error::CorruptRowImage(m),
            TerminalKind::UnsupportedEvent(t) => Error::UnsupportedEvent(t),
            TerminalKind::GtidParse(m) => Error::GtidParse(m),
            TerminalKind::Protocol(m) => Error::Protocol(m),
        }
    }
}

#[derive(Default)]
struct Shared {
    terminal: Mutex<Option<TerminalKind>>,
}

impl Shared {
    fn close(&self, cause: Option<&Error>) {
        let mut guard = self.terminal.lock().unwrap();
        if guard.is_none() {
            *guard = Some(cause.map(TerminalKind::from_error).unwrap_or(TerminalKind::Canceled));
        }
    }

    fn peek(&self) -> Option<Error> {
        self.terminal.lock().unwrap().clone().map(TerminalKind::into_error)
    }
}

/// Consumer-facing half of the queue (§4.7).
pub struct Streamer {
    receiver: Receiver<DecodedEvent>,
    shared: Arc<Shared>,
}

/// Producer-facing half, held by the `BinlogSyncer`'s read loop.
pub struct StreamerProducer {
    sender: SyncSender<DecodedEvent>,
    shared: Arc<Shared>,
}

/// Creates a linked producer/consumer pair with the given queue capacity.
pub fn channel(capacity: usize) -> (StreamerProducer, Streamer) {
    let (tx, rx) = sync_channel(capacity.max(1));
    let shared = Arc::new(Shared::default());
    (
        StreamerProducer { sender: tx, shared: shared.clone() },
        Streamer { receiver: rx, shared },
    )
}

impl StreamerProducer {
    /// Enqueues a decoded event, blocking when the queue is full (the
    /// back-pressure mechanism described in §5). Fails if the consumer has
    /// already closed its end.
    pub fn send(&self, event: DecodedEvent) -> crate::error::Result<()> {
        self.sender.send(event).map_err(|_| Error::Canceled)
    }

    /// Marks the stream closed. `cause` is `None` for a clean, intentional
    /// shutdown (consumer-initiated close or exhausted reconnect budget
    /// with no further error to report) and `Some` for a fatal error that
    /// every subsequent `Streamer::next` call will reproduce.
    pub fn close(&self, cause: Option<Error>) {
        self.shared.close(cause.as_ref());
    }

    pub fn is_closed(&self) -> bool {
        self.shared.terminal.lock().unwrap().is_some()
    }
}

impl Streamer {
    /// Returns the next event, waiting until `deadline` (or indefinitely if
    /// `None`). Once the stream is closed, every call returns the same
    /// terminal error; a buffered event that arrived before close is still
    /// delivered first.
    pub fn next(&self, deadline: Option<Instant>) -> crate::error::Result<DecodedEvent> {
        loop {
            let wait = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Err(Error::DeadlineExceeded);
                    }
                    d - now
                }
                // re-poll periodically so a close() without a pending send
                // is still observed promptly.
                None => Duration::from_millis(200),
            };

            match self.receiver.recv_timeout(wait) {
                Ok(event) => return Ok(event),
                Err(RecvTimeoutError::Timeout) => {
                    if deadline.is_some() {
                        return Err(Error::DeadlineExceeded);
                    }
                    if let Some(err) = self.shared.peek() {
                        return Err(err);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(self.shared.peek().unwrap_or(Error::Canceled));
                }
            }
        }
    }

    /// Signals cancellation from the consumer side; a producer still
    /// blocked on `send` observes the disconnected channel and a subsequent
    /// `next()` (if the producer also calls `close`) returns `Canceled`.
    pub fn cancel(&self) {
        self.shared.close(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::event::{Event, EventHeader};

    fn sample_event() -> DecodedEvent {
        DecodedEvent {
            header: EventHeader { timestamp: 0, event_type: 0, server_id: 1, event_size: 19, log_pos: 0, flags: 0 },
            event: Event::Heartbeat,
        }
    }

    #[test]
    fn delivers_events_in_order() {
        let (producer, streamer) = channel(4);
        producer.send(sample_event()).unwrap();
        producer.send(sample_event()).unwrap();
        assert!(streamer.next(None).is_ok());
        assert!(streamer.next(None).is_ok());
    }

    #[test]
    fn deadline_exceeded_when_nothing_arrives() {
        let (_producer, streamer) = channel(4);
        let deadline = Instant::now() + Duration::from_millis(10);
        let err = streamer.next(Some(deadline)).unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded));
    }

    #[test]
    fn closed_stream_reproduces_terminal_error_on_every_call() {
        let (producer, streamer) = channel(4);
        producer.close(Some(Error::MissingTableMap(7)));
        assert!(matches!(streamer.next(None), Err(Error::MissingTableMap(7))));
        assert!(matches!(streamer.next(None), Err(Error::MissingTableMap(7))));
    }

    #[test]
    fn buffered_event_is_delivered_before_terminal_error() {
        let (producer, streamer) = channel(4);
        producer.send(sample_event()).unwrap();
        producer.close(Some(Error::Canceled));
        assert!(streamer.next(None).is_ok());
        assert!(streamer.next(None).is_err());
    }

    #[test]
    fn consumer_cancel_is_observed_as_canceled() {
        let (_producer, streamer) = channel(4);
        streamer.cancel();
        assert!(matches!(streamer.next(None), Err(Error::Canceled)));
    }
}
