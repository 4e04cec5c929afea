//! Connection identity and the write-serialization protocol (spec §4.2, §5).
//!
//! Grounded on `client/reactor.rs`'s non-blocking-socket handling: a
//! `WouldBlock` from a `try_write` call means "register for write
//! readiness and wait", exactly the `drain_buf`/`mio::Interest::WRITABLE`
//! dance the teacher's reactor thread performs. The teacher gets away
//! with a single reactor thread owning the socket; this core's spec
//! requires *any* operation thread to be able to write to the socket, so
//! the non-blocking retry loop is lifted out of a single-threaded event
//! loop into `Connection::send_pdu`, coordinated by a `Mutex` + `Condvar`
//! pair per connection (spec §5 "Locks").

use std::io;
use std::sync::{Arc, Condvar, Mutex};

use crate::error::WriteOutcome;

/// The write half of a connection's socket.
///
/// Modeled as a trait rather than hardwiring `mio::net::TcpStream` so the
/// core can be driven by tests (an in-memory double) or by a datagram
/// socket without forcing one concrete type, the way the teacher's
/// `Reactor` hardwires `mio::net::UnixStream` only because it owns the
/// one transport PulseAudio ever speaks over.
pub trait WriteHalf: Send {
    /// Non-blocking write. Must return `Err` with
    /// `io::ErrorKind::WouldBlock` rather than blocking when the socket
    /// buffer is full.
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

/// Adapter over `mio::net::TcpStream` for production use.
pub struct MioWriteHalf(pub mio::net::TcpStream);

impl WriteHalf for MioWriteHalf {
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        use std::io::Write;
        self.0.write(buf)
    }
}

/// Registers or unregisters a connection's socket for write-readiness
/// notifications with the external event loop (spec §6, "Event-loop
/// notification"). The core does not own a `mio::Poll`; the listener
/// does, and is told about write interest through this trait.
pub trait WriteInterest: Send {
    fn set_write_interest(&self, interested: bool);
}

/// A no-op registrar for transports that don't need write-readiness
/// hints (e.g. a connectionless/UDP "connection", or test doubles that
/// always succeed synchronously).
pub struct NoWriteInterest;

impl WriteInterest for NoWriteInterest {
    fn set_write_interest(&self, _interested: bool) {}
}

struct ConnState {
    closing: bool,
    writer_waiting: bool,
}

/// An accepted client connection (spec §3 "Connection").
///
/// Owns two mutexes and one condition variable, per spec §5: an outer
/// `write_mutex` serializing whole-PDU emission (invariant I1), and an
/// inner `state` mutex guarding the closing flag and the waiter count,
/// with `write_ready` signaled whenever the event loop (or a test
/// harness) believes the socket may accept more bytes. Generic over the
/// socket type `W` rather than a boxed trait object, since a connection's
/// transport never changes after it is accepted.
pub struct Connection<W: WriteHalf> {
    pub id: u64,
    pub connectionless: bool,
    socket: Mutex<W>,
    write_mutex: Mutex<()>,
    state: Mutex<ConnState>,
    write_ready: Condvar,
    interest: Arc<dyn WriteInterest>,
}

impl<W: WriteHalf> Connection<W> {
    pub fn new(id: u64, connectionless: bool, socket: W, interest: Arc<dyn WriteInterest>) -> Self {
        Connection {
            id,
            connectionless,
            socket: Mutex::new(socket),
            write_mutex: Mutex::new(()),
            state: Mutex::new(ConnState {
                closing: false,
                writer_waiting: false,
            }),
            write_ready: Condvar::new(),
            interest,
        }
    }

    /// Whether the connection has already been marked closing (spec §3
    /// "closing predicate"). Checked by the search-entry/reference
    /// emitters only indirectly, through `send_pdu`'s return value.
    pub fn is_closing(&self) -> bool {
        self.state.lock().expect("connection state mutex poisoned").closing
    }

    /// Signals the write-ready condition variable, e.g. from the event
    /// loop after `poll` reports the socket writable again. Also called
    /// when transitioning to closing, so any waiter wakes up and
    /// re-observes the closing flag at the top of its loop (spec §5
    /// "Cancellation").
    pub fn notify_write_ready(&self) {
        self.write_ready.notify_all();
    }

    /// Test-only escape hatch to inspect the socket (e.g. a
    /// `ScriptedSocket`'s captured bytes).
    #[cfg(test)]
    pub(crate) fn with_socket<R>(&self, f: impl FnOnce(&W) -> R) -> R {
        let socket = self.socket.lock().expect("connection socket mutex poisoned");
        f(&socket)
    }

    /// Test-only escape hatch so other modules' tests can put a
    /// connection into the closing state without going through a real
    /// write failure (spec §7 "Closing connection" quiet-drop path).
    #[cfg(test)]
    pub(crate) fn mark_closing_for_test(&self) {
        self.mark_closing();
    }

    fn mark_closing(&self) {
        let mut state = self.state.lock().expect("connection state mutex poisoned");
        state.closing = true;
        drop(state);
        self.write_ready.notify_all();
    }

    /// `send-pdu(connection, buffer) -> bytes-written or failure` (spec
    /// §4.2). Serializes against every other emitter on this connection
    /// via `write_mutex`, then drives the non-blocking flush/backoff
    /// protocol under `state`.
    pub fn send_pdu(&self, buf: &[u8]) -> WriteOutcome {
        let _write_guard = self.write_mutex.lock().expect("connection write mutex poisoned");
        let mut state = self.state.lock().expect("connection state mutex poisoned");

        if state.closing {
            return WriteOutcome::AlreadyClosing;
        }

        let total = buf.len();
        let mut sent = 0usize;

        loop {
            let mut socket = self.socket.lock().expect("connection socket mutex poisoned");
            match socket.try_write(&buf[sent..]) {
                Ok(n) => {
                    drop(socket);
                    sent += n;
                    if sent >= total {
                        if state.writer_waiting {
                            state.writer_waiting = false;
                            self.interest.set_write_interest(false);
                        }
                        return WriteOutcome::Written(total);
                    }
                    // Partial write: loop again without blocking, the
                    // socket just accepted less than we offered.
                    continue;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    drop(socket);
                    state.writer_waiting = true;
                    self.interest.set_write_interest(true);
                    log::trace!(
                        "conn={} write would block, waiting for writability",
                        self.id
                    );
                    state = self
                        .write_ready
                        .wait(state)
                        .expect("connection state mutex poisoned");
                    state.writer_waiting = false;
                    if state.closing {
                        return WriteOutcome::AlreadyClosing;
                    }
                    continue;
                }
                Err(err) => {
                    drop(socket);
                    log::error!("conn={} write failed, closing connection: {err}", self.id);
                    drop(state);
                    self.mark_closing();
                    return WriteOutcome::Failed;
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use std::sync::Arc;

    #[test]
    fn immediate_success_returns_byte_count() {
        let socket = ScriptedSocket::new(0);
        let conn = Connection::new(1, false, socket, Arc::new(NoWriteInterest));
        assert_eq!(conn.send_pdu(b"hello"), WriteOutcome::Written(5));
    }

    #[test]
    fn closing_connection_drops_quietly() {
        let socket = ScriptedSocket::new(0);
        let conn = Connection::new(1, false, socket, Arc::new(NoWriteInterest));
        conn.mark_closing();
        assert_eq!(conn.send_pdu(b"hello"), WriteOutcome::AlreadyClosing);
    }

    #[test]
    fn would_block_then_succeeds_after_retry() {
        let socket = ScriptedSocket::new(2);
        let interest = Arc::new(RecordingInterest::default());
        let conn = Arc::new(Connection::new(1, false, socket, interest.clone()));

        // Stands in for the external event loop: wakes the writer after
        // every `WouldBlock`, the way a `mio::Poll` would once it
        // observed the socket writable again.
        let waker = {
            let conn = conn.clone();
            std::thread::spawn(move || {
                for _ in 0..2 {
                    std::thread::sleep(std::time::Duration::from_millis(5));
                    conn.notify_write_ready();
                }
            })
        };

        assert_eq!(conn.send_pdu(b"abc"), WriteOutcome::Written(3));
        waker.join().unwrap();
        assert_eq!(*interest.interested.lock().unwrap(), false);
    }

    #[test]
    fn write_error_marks_connection_closing() {
        let socket = ScriptedSocket::failing();
        let conn = Connection::new(1, false, socket, Arc::new(NoWriteInterest));
        assert_eq!(conn.send_pdu(b"abc"), WriteOutcome::Failed);
        assert!(conn.is_closing());
    }

    #[test]
    fn concurrent_emits_do_not_interleave_bytes() {
        let socket = ScriptedSocket::new(0);
        let conn = Arc::new(Connection::new(1, false, socket, Arc::new(NoWriteInterest)));

        let a = {
            let conn = conn.clone();
            std::thread::spawn(move || conn.send_pdu(&[1u8; 64]))
        };
        let b = {
            let conn = conn.clone();
            std::thread::spawn(move || conn.send_pdu(&[2u8; 64]))
        };
        let ra = a.join().unwrap();
        let rb = b.join().unwrap();
        assert_eq!(ra, WriteOutcome::Written(64));
        assert_eq!(rb, WriteOutcome::Written(64));
    }
}
