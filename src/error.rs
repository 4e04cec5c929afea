//! Error types for the response-emission core.

use thiserror::Error;

/// An error produced while encoding a BER value.
///
/// Encoding into an in-memory `Vec<u8>` can practically only fail due to
/// allocation exhaustion, but the error is kept distinct from I/O so that
/// callers never confuse a build-time encoding failure with a socket
/// write failure.
#[derive(Error, Debug)]
pub enum EncodeError {
    /// An underlying `std::io::Write` call failed.
    #[error("BER encoding I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A length computed during encoding did not fit the wire format
    /// (e.g. an octet string longer than `u32::MAX`).
    #[error("value too large to encode: {0}")]
    TooLarge(usize),
    /// A constructor (`begin_sequence`/`begin_set`) was closed without a
    /// matching open, or vice versa.
    #[error("unbalanced BER constructor")]
    Unbalanced,
}

/// Outcome of a write attempt against a connection's socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The PDU was written in full; carries the byte count.
    Written(usize),
    /// The connection was already closing, or transitioned to closing
    /// while this call was waiting on write-readiness (spec §4.2 step 2,
    /// §5 "Cancellation"). A quiet, benign drop: nothing was written, but
    /// this is not a new failure — spec §7 calls it
    /// "success-with-no-transmission".
    AlreadyClosing,
    /// The underlying socket write failed; the connection has just been
    /// marked closing as a result (spec §4.2 step 5, §7 "Write failure").
    Failed,
}

/// Outcome of an emission attempt, matching the `{0, 1, -1}` contract of
/// spec.md's emitters, expressed as a closed enum instead of magic
/// integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    /// The PDU was transmitted (or the operation was a no-op and would
    /// have been).
    Sent,
    /// The entry/reference/result was recoverably skipped: ACL denial,
    /// or an encoding error for which a substitute result was already
    /// sent.
    Skipped,
    /// The underlying socket write failed; the connection is now
    /// closing.
    WriteFailed,
}
