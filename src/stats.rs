//! Statistics & Logging Sink (spec §2 component 5, §4 "Statistics &
//! Logging Sink", invariant I6).
//!
//! The source keeps four process-wide counters under one dedicated
//! mutex; this implementation uses `AtomicU64`s instead, which spec §9
//! explicitly allows ("equivalent atomic counters are acceptable
//! provided ordering with the writer is preserved"). `SeqCst` is used
//! throughout rather than a weaker ordering, matching the teacher's
//! conservative `AtomicU32`/default-ordering use in `reactor.rs`'s
//! `SharedState::next_seq`.

use std::sync::atomic::{AtomicU64, Ordering};

/// The four counters named in spec §3 invariant I6.
#[derive(Default)]
pub struct Counters {
    pub bytes_sent: AtomicU64,
    pub pdus_sent: AtomicU64,
    pub entries_sent: AtomicU64,
    pub references_sent: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Counters::default()
    }

    /// Called once per successfully-transmitted RESULT/SASL/EXTENDED/
    /// INTERMEDIATE PDU (spec §4.3.1 "on success").
    pub fn record_pdu(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::SeqCst);
        self.pdus_sent.fetch_add(1, Ordering::SeqCst);
    }

    /// Called once per successfully-transmitted search entry (spec §4.4
    /// step 10).
    pub fn record_entry(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::SeqCst);
        self.pdus_sent.fetch_add(1, Ordering::SeqCst);
        self.entries_sent.fetch_add(1, Ordering::SeqCst);
    }

    /// Called once per successfully-transmitted search reference (spec
    /// §4.5).
    pub fn record_reference(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::SeqCst);
        self.pdus_sent.fetch_add(1, Ordering::SeqCst);
        self.references_sent.fetch_add(1, Ordering::SeqCst);
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::SeqCst)
    }

    pub fn pdus_sent(&self) -> u64 {
        self.pdus_sent.load(Ordering::SeqCst)
    }

    pub fn entries_sent(&self) -> u64 {
        self.entries_sent.load(Ordering::SeqCst)
    }

    pub fn references_sent(&self) -> u64 {
        self.references_sent.load(Ordering::SeqCst)
    }
}

/// Target used for the always-on stats line, kept distinct from the
/// crate's ordinary `trace`/`debug`/`error` call sites (SPEC_FULL §2)
/// so a deployment can route it to a dedicated appender.
pub const STATS_TARGET: &str = "ldap_response_core::stats";

/// `conn=<id> op=<id> RESULT tag=<n> err=<n> text=<...>` (spec §6).
pub fn log_result(conn_id: u64, op_msgid: i32, tag: u8, err: u32, text: &str) {
    log::info!(target: STATS_TARGET, "conn={conn_id} op={op_msgid} RESULT tag={tag} err={err} text={text}");
}

/// `conn=<id> op=<id> SEARCH RESULT tag=<n> err=<err> nentries=<k> text=<...>` (spec §6).
pub fn log_search_result(conn_id: u64, op_msgid: i32, tag: u8, err: u32, nentries: u32, text: &str) {
    log::info!(
        target: STATS_TARGET,
        "conn={conn_id} op={op_msgid} SEARCH RESULT tag={tag} err={err} nentries={nentries} text={text}"
    );
}

/// `conn=<id> op=<id> ENTRY dn="<...>"` (spec §6).
pub fn log_entry(conn_id: u64, op_msgid: i32, dn: &str) {
    log::info!(target: STATS_TARGET, "conn={conn_id} op={op_msgid} ENTRY dn=\"{dn}\"");
}

/// `conn=<id> op=<id> REF dn="<...>"` (spec §6).
pub fn log_reference(conn_id: u64, op_msgid: i32, dn: &str) {
    log::info!(target: STATS_TARGET, "conn={conn_id} op={op_msgid} REF dn=\"{dn}\"");
}

/// `conn=<id> op=<id> DISCONNECT tag=<n> err=<n> text=<...>` (spec §6).
pub fn log_disconnect(conn_id: u64, op_msgid: i32, tag: u8, err: u32, text: &str) {
    log::info!(target: STATS_TARGET, "conn={conn_id} op={op_msgid} DISCONNECT tag={tag} err={err} text={text}");
}
