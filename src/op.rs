//! `Operation`: one in-flight request on a connection (spec §3).
//!
//! Bundles everything an emitter needs about the request that produced a
//! reply: its tag/msgid/version triple for the envelope builder, the
//! requested-attribute list and "attributes-only" flag for the entry
//! emitter, the optional callback bundle that replaces on-wire emission
//! entirely, and the v2 search-reference accumulator that spans the
//! whole operation rather than a single reply.

use std::sync::{Arc, Mutex};

use crate::acl::ComputedAttributePlugin;
use crate::callbacks::Callbacks;
use crate::conn::{Connection, WriteHalf};
use crate::model::{AttributeDescription, ProtocolVersion, RequestTag};

/// One in-flight request (spec §3 "Operation").
pub struct Operation<W: WriteHalf> {
    pub request_tag: RequestTag,
    pub msgid: i32,
    pub version: ProtocolVersion,
    pub connection: Arc<Connection<W>>,
    /// Absent means "all user attributes" (spec §3).
    pub requested_attrs: Option<Vec<AttributeDescription>>,
    pub attributes_only: bool,
    pub connectionless: bool,
    /// Suppresses wire emission but the caller still wants counters
    /// updated and, for the search-entry path, still wants the buffer
    /// built and discarded (spec §4.4 step 10).
    pub noop: bool,
    pub callbacks: Option<Callbacks<W>>,
    /// Externally-supplied output buffer for connectionless (datagram)
    /// mode (spec §3 "Operation"). When present and the connection is
    /// connectionless, emitters append complete PDUs here instead of
    /// invoking the connection writer; the buffer's lifecycle belongs to
    /// the UDP framing layer, out of this crate's scope (spec §1).
    pub datagram_buffer: Option<Mutex<Vec<u8>>>,
    /// Domain-scope control: suppresses referrals that leave the current
    /// naming context (spec GLOSSARY, §4.3 "referral downgrade rule").
    pub domain_scope: bool,
    /// Computed-attribute plugin surface (spec §4.4 step 8), optional.
    pub plugins: Vec<Box<dyn ComputedAttributePlugin<W>>>,
    /// URIs accumulated across `emit_search_reference` calls on this
    /// operation when the negotiated version does not support on-wire
    /// search references (spec §4.5); flattened into the final result's
    /// diagnostic text by `emit_result` (spec §4.3).
    v2_referrals: Mutex<Vec<String>>,
}

impl<W: WriteHalf> Operation<W> {
    pub fn new(
        request_tag: RequestTag,
        msgid: i32,
        version: ProtocolVersion,
        connection: Arc<Connection<W>>,
    ) -> Self {
        Operation {
            request_tag,
            msgid,
            version,
            connection,
            requested_attrs: None,
            attributes_only: false,
            connectionless: false,
            noop: false,
            callbacks: None,
            datagram_buffer: None,
            domain_scope: false,
            plugins: Vec::new(),
            v2_referrals: Mutex::new(Vec::new()),
        }
    }

    /// Appends URIs to the v2 referral accumulator (spec §4.5, version<3
    /// branch).
    pub fn accumulate_v2_referrals(&self, uris: &[String]) {
        self.v2_referrals.lock().expect("v2 referral accumulator poisoned").extend_from_slice(uris);
    }

    /// Drains the accumulator for the final result emission (spec §4.3,
    /// "referral downgrade rule" / model.rs `ReplyDescriptor::v2_referrals`).
    pub fn take_v2_referrals(&self) -> Vec<String> {
        std::mem::take(&mut self.v2_referrals.lock().expect("v2 referral accumulator poisoned"))
    }

    /// Appends a complete PDU to the connectionless output buffer (spec
    /// §3 Lifecycles: "externally owned by the operation and not
    /// destroyed here").
    pub fn append_datagram(&self, bytes: &[u8]) {
        if let Some(buf) = &self.datagram_buffer {
            buf.lock().expect("datagram buffer poisoned").extend_from_slice(bytes);
        }
    }
}
