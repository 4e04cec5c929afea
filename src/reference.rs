//! Search Reference Emitter (spec §4.5).
//!
//! Encodes a `SearchResultReference` for a v3 client, or folds the
//! reference's URIs into the operation's v2 accumulator for a v2 client
//! (spec §4.3 then flattens that accumulator into the final result's
//! diagnostic text). Structurally the lightest of the three search-path
//! emitters: no attribute/value walk, no values-return filter, no
//! computed-attribute plugins.

use crate::acl::{AccessControl, AccessKind, AclState};
use crate::ber::{Class, Encoder};
use crate::conn::WriteHalf;
use crate::error::{EmitOutcome, WriteOutcome};
use crate::model::{AttributeDescription, ReplyDescriptor, ResponseTag};
use crate::op::Operation;
use crate::stats::{self, Counters};

/// `emit-search-reference(op, reply) -> EmitOutcome` (spec §4.5).
///
/// `Sent` covers both "emitted on the wire" and "accumulated for later
/// v2 flattening" and "silently dropped by domain scope" — all three are
/// the spec's `0`. `Skipped` is the spec's `1` (null referral list).
/// `WriteFailed` is `-1`.
pub fn emit_search_reference<W: WriteHalf>(
    op: &Operation<W>,
    reply: &ReplyDescriptor,
    acl: &dyn AccessControl<W>,
    counters: &Counters,
) -> EmitOutcome {
    if let Some(callbacks) = &op.callbacks {
        if let Some(on_reference) = &callbacks.on_reference {
            return match on_reference(op, reply) {
                0 => EmitOutcome::Sent,
                1 => EmitOutcome::Skipped,
                _ => EmitOutcome::WriteFailed,
            };
        }
    }

    let Some(entry) = &reply.entry else {
        log::error!(
            "conn={} op={} emit_search_reference called with no entry in reply",
            op.connection.id,
            op.msgid
        );
        return EmitOutcome::Skipped;
    };

    let mut acl_state = AclState::empty();
    if !acl.allowed(op, entry, &AttributeDescription::pseudo_entry(), None, AccessKind::Read, &mut acl_state)
        || !acl.allowed(op, entry, &AttributeDescription::pseudo_ref(), None, AccessKind::Read, &mut acl_state)
    {
        log::debug!("conn={} op={} ACL denied read on reference {}", op.connection.id, op.msgid, entry.dn);
        return EmitOutcome::Skipped;
    }

    if op.domain_scope {
        return EmitOutcome::Sent;
    }

    let Some(referrals) = reply.referrals.as_ref().filter(|r| !r.is_empty()) else {
        return EmitOutcome::Skipped;
    };

    if op.version.is_v2() {
        op.accumulate_v2_referrals(referrals);
        return EmitOutcome::Sent;
    }

    let mut enc = Encoder::new();
    enc.begin_sequence();
    if enc.write_integer(op.msgid as i64).is_err() {
        log::error!("conn={} op={} encoding error building search reference", op.connection.id, op.msgid);
        return EmitOutcome::Skipped;
    }
    enc.write_tagged(Class::Application, ResponseTag::SearchResultReference as u8);
    if enc.write_octet_string_list(referrals).is_err() {
        log::error!("conn={} op={} encoding error building search reference", op.connection.id, op.msgid);
        return EmitOutcome::Skipped;
    }
    if enc.end_sequence().is_err() {
        log::error!("conn={} op={} encode end error building search reference", op.connection.id, op.msgid);
        return EmitOutcome::Skipped;
    }

    let buf = match enc.finish() {
        Ok(b) => b,
        Err(_) => {
            log::error!("conn={} op={} encode end error building search reference", op.connection.id, op.msgid);
            return EmitOutcome::Skipped;
        }
    };

    match op.connection.send_pdu(&buf) {
        WriteOutcome::Written(n) => {
            counters.record_reference(n);
            stats::log_reference(op.connection.id, op.msgid, &entry.dn);
            EmitOutcome::Sent
        }
        // Already closing: success-with-no-transmission (spec §7).
        WriteOutcome::AlreadyClosing => EmitOutcome::Sent,
        WriteOutcome::Failed => EmitOutcome::WriteFailed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::AccessKind;
    use crate::conn::test_support::ScriptedSocket;
    use crate::conn::{Connection, NoWriteInterest};
    use crate::model::{Entry, ProtocolVersion, RequestTag};
    use std::sync::Arc;

    struct AllowAll;
    impl AccessControl<ScriptedSocket> for AllowAll {
        fn allowed(&self, _op: &Operation<ScriptedSocket>, _entry: &Entry, _desc: &AttributeDescription, _value: Option<&[u8]>, _kind: AccessKind, _state: &mut AclState) -> bool {
            true
        }
    }

    struct DenyRef;
    impl AccessControl<ScriptedSocket> for DenyRef {
        fn allowed(&self, _op: &Operation<ScriptedSocket>, _entry: &Entry, desc: &AttributeDescription, _value: Option<&[u8]>, _kind: AccessKind, _state: &mut AclState) -> bool {
            desc.name != "ref"
        }
    }

    fn entry() -> Entry {
        Entry {
            dn: "ou=people,dc=example,dc=com".to_string(),
            ndn: "ou=people,dc=example,dc=com".to_string(),
            attrs: Vec::new(),
        }
    }

    fn test_op(version: ProtocolVersion) -> Operation<ScriptedSocket> {
        let conn = Arc::new(Connection::new(1, false, ScriptedSocket::new(0), Arc::new(NoWriteInterest)));
        Operation::new(RequestTag::Search, 7, version, conn)
    }

    #[test]
    fn acl_denied_returns_skipped() {
        let op = test_op(ProtocolVersion::V3);
        let mut reply = ReplyDescriptor::success();
        reply.entry = Some(entry());
        reply.referrals = Some(vec!["ldap://a/".to_string()]);
        let counters = Counters::new();
        let outcome = emit_search_reference(&op, &reply, &DenyRef, &counters);
        assert_eq!(outcome, EmitOutcome::Skipped);
        assert_eq!(counters.references_sent(), 0);
    }

    #[test]
    fn null_referral_list_is_skipped() {
        let op = test_op(ProtocolVersion::V3);
        let mut reply = ReplyDescriptor::success();
        reply.entry = Some(entry());
        reply.referrals = None;
        let counters = Counters::new();
        let outcome = emit_search_reference(&op, &reply, &AllowAll, &counters);
        assert_eq!(outcome, EmitOutcome::Skipped);
    }

    #[test]
    fn domain_scope_drops_reference_without_emitting() {
        let mut op = test_op(ProtocolVersion::V3);
        op.domain_scope = true;
        let mut reply = ReplyDescriptor::success();
        reply.entry = Some(entry());
        reply.referrals = Some(vec!["ldap://a/".to_string()]);
        let counters = Counters::new();
        let outcome = emit_search_reference(&op, &reply, &AllowAll, &counters);
        assert_eq!(outcome, EmitOutcome::Sent);
        assert_eq!(counters.references_sent(), 0);
    }

    #[test]
    fn v2_client_accumulates_instead_of_emitting() {
        let op = test_op(ProtocolVersion::V2);
        let mut reply = ReplyDescriptor::success();
        reply.entry = Some(entry());
        reply.referrals = Some(vec!["ldap://a/".to_string(), "ldap://b".to_string()]);
        let counters = Counters::new();
        let outcome = emit_search_reference(&op, &reply, &AllowAll, &counters);
        assert_eq!(outcome, EmitOutcome::Sent);
        assert_eq!(counters.references_sent(), 0, "v2 references are accumulated, not transmitted");
        assert_eq!(op.take_v2_referrals(), vec!["ldap://a/".to_string(), "ldap://b".to_string()]);
    }

    #[test]
    fn v3_client_emits_search_result_reference_pdu() {
        let op = test_op(ProtocolVersion::V3);
        let mut reply = ReplyDescriptor::success();
        reply.entry = Some(entry());
        reply.referrals = Some(vec!["ldap://a/".to_string()]);
        let counters = Counters::new();
        let outcome = emit_search_reference(&op, &reply, &AllowAll, &counters);
        assert_eq!(outcome, EmitOutcome::Sent);
        assert_eq!(counters.references_sent(), 1);
        let bytes = op.connection.with_socket(|s| s.written.lock().unwrap().clone());
        assert_eq!(bytes[0], 0x30); // outer SEQUENCE
        assert!(bytes.contains(&(0x60 | ResponseTag::SearchResultReference as u8)));
    }
}
