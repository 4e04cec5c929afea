//! Response Envelope Builder (spec §4.3) and the internal response
//! assembler (spec §4.3.1).
//!
//! Public entry points mirror spec §4.3 one-for-one: `emit_result`,
//! `emit_disconnect`, `emit_sasl`, `emit_extended`, `emit_intermediate`,
//! `emit_search_result`. Each derives a response tag and message id from
//! the originating operation and the req2res table (`model::req2res`),
//! applies the v2 referral-downgrade rule where relevant, and delegates
//! to the private `assemble` function.

use crate::ber::{Class, Encoder};
use crate::conn::WriteHalf;
use crate::error::{EmitOutcome, WriteOutcome};
use crate::model::{ReplyDescriptor, ReplyType, ResponseTag, ResultCode};
use crate::op::Operation;
use crate::stats::{self, Counters};

const TAG_REFERRAL: u8 = 3;
const TAG_SASL_CREDS: u8 = 7;
const TAG_EXOP_OID: u8 = 10;
const TAG_EXOP_VALUE: u8 = 11;
const TAG_CONTROLS: u8 = 0;

/// OID of the "disconnection notice" unsolicited response (RFC 4511
/// §4.4.1), used by `emit_disconnect` on v3 connections.
pub const DISCONNECTION_NOTICE_OID: &str = "1.3.6.1.4.1.1466.20036";

/// Builds the locally-owned, fully-downgraded reply descriptor that
/// `emit_result`/`emit_search_result` hand to the assembler: merges v2
/// search-reference accumulation, applies the referral downgrade rule,
/// flattens referrals into text for v2, and fills in tag/msgid. Asserts
/// the result code is not a client-side pseudo-error (spec §7,
/// "Client-side pseudo-errors ... forbidden on the result path").
///
/// Split out from `emit_result` so `emit_search_result` can log the
/// stats line with the *downgraded* code/text (the original logs
/// `rs->sr_err`/`rs->sr_text` after the downgrade, result.c:469-492)
/// rather than the pre-downgrade values the caller passed in.
fn prepare_result<W: WriteHalf>(op: &Operation<W>, reply: &ReplyDescriptor) -> ReplyDescriptor {
    assert!(
        !reply.result_code.is_client_side_pseudo_error(),
        "client-side pseudo-error must never reach the wire"
    );

    let mut local = reply.clone();

    if op.version.is_v2() {
        // v3 clients get search references emitted directly on the wire
        // (spec §4.5); only v2 clients fold accumulated reference URIs
        // into the final result.
        let mut merged = local.referrals.take().unwrap_or_default();
        merged.extend(op.take_v2_referrals());
        local.referrals = if merged.is_empty() { None } else { Some(merged) };
    }

    apply_referral_downgrade(op, &mut local);

    if op.version.is_v2() {
        flatten_v2_referrals(&mut local);
    }

    let (tag, msgid) = derive_tag_msgid(op, local.reply_type);
    local.tag = Some(tag);
    local.msgid = Some(msgid);

    local
}

/// `emit-result(op, reply) -> EmitOutcome` (spec §4.3).
///
/// Applies the referral downgrade rule and the v2 referral-to-text
/// flattening, then delegates to the assembler with a local clone of the
/// reply so the caller's descriptor is never mutated (spec §9 "Field
/// swap for v2 referral flattening").
pub fn emit_result<W: WriteHalf>(op: &Operation<W>, reply: &ReplyDescriptor, counters: &Counters) -> EmitOutcome {
    let local = prepare_result(op, reply);
    assemble(op, &local, counters)
}

/// `emit-disconnect(op, reply) -> EmitOutcome` (spec §4.3).
///
/// Used only for unsolicited notifications signalling `PROTOCOL_ERROR`,
/// `STRONG_AUTH_REQUIRED`, or `UNAVAILABLE` (asserted). Reply type is
/// forced to `Extended`.
pub fn emit_disconnect<W: WriteHalf>(op: &Operation<W>, reply: &ReplyDescriptor, counters: &Counters) -> EmitOutcome {
    assert!(
        reply.result_code == ResultCode::PROTOCOL_ERROR
            || reply.result_code == ResultCode::STRONG_AUTH_REQUIRED
            || reply.result_code == ResultCode::UNAVAILABLE,
        "emit_disconnect only carries PROTOCOL_ERROR, STRONG_AUTH_REQUIRED, or UNAVAILABLE"
    );

    let mut local = reply.clone();
    local.reply_type = ReplyType::Extended;

    if op.version.is_v2() {
        let (tag, msgid) = derive_tag_msgid(op, ReplyType::Result);
        local.tag = Some(tag);
        local.msgid = Some(msgid);
    } else {
        local.tag = Some(ResponseTag::ExtendedRes);
        local.msgid = Some(0);
        local.extended_oid = Some(DISCONNECTION_NOTICE_OID.to_string());
    }

    let outcome = assemble(op, &local, counters);
    stats::log_disconnect(
        op.connection.id,
        op.msgid,
        local.tag.unwrap() as u8,
        local.result_code.0,
        local.diagnostic_text.as_deref().unwrap_or(""),
    );
    outcome
}

/// `emit-sasl(op, reply)` (spec §4.3).
pub fn emit_sasl<W: WriteHalf>(op: &Operation<W>, reply: &ReplyDescriptor, counters: &Counters) -> EmitOutcome {
    let mut local = reply.clone();
    local.reply_type = ReplyType::Sasl;
    let (tag, msgid) = derive_tag_msgid(op, ReplyType::Sasl);
    local.tag = Some(tag);
    local.msgid = Some(msgid);
    assemble(op, &local, counters)
}

/// `emit-extended(op, reply)` (spec §4.3).
pub fn emit_extended<W: WriteHalf>(op: &Operation<W>, reply: &ReplyDescriptor, counters: &Counters) -> EmitOutcome {
    let mut local = reply.clone();
    local.reply_type = ReplyType::Extended;
    let (tag, msgid) = derive_tag_msgid(op, ReplyType::Extended);
    local.tag = Some(tag);
    local.msgid = Some(msgid);
    assemble(op, &local, counters)
}

/// `emit-intermediate(op, reply)` (spec §4.3): fixed response tag, the
/// operation's own message id (never `0` and never remapped).
pub fn emit_intermediate<W: WriteHalf>(op: &Operation<W>, reply: &ReplyDescriptor, counters: &Counters) -> EmitOutcome {
    let mut local = reply.clone();
    local.reply_type = ReplyType::Intermediate;
    local.tag = Some(ResponseTag::IntermediateRes);
    local.msgid = Some(op.msgid);
    assemble(op, &local, counters)
}

/// `emit-search-result(op, reply)` (spec §4.3): sets reply type then
/// delegates to the same preparation `emit_result` uses, logging the
/// stats line with the *downgraded* result code and text (matching the
/// original's `send_ldap_result`, which logs after the referral downgrade
/// rule has already run, result.c:469-492) rather than the caller's
/// pre-downgrade values.
pub fn emit_search_result<W: WriteHalf>(op: &Operation<W>, reply: &ReplyDescriptor, counters: &Counters) -> EmitOutcome {
    let mut local = reply.clone();
    local.reply_type = ReplyType::SearchResult;
    let prepared = prepare_result(op, &local);
    let outcome = assemble(op, &prepared, counters);
    stats::log_search_result(
        op.connection.id,
        op.msgid,
        ResponseTag::SearchResultDone as u8,
        prepared.result_code.0,
        prepared.nentries,
        prepared.diagnostic_text.as_deref().unwrap_or(""),
    );
    outcome
}

/// Maps `(request-tag, version, outcome)` to a response tag and message
/// id (spec §4.3, invariant I2). The sentinel "no reply" (Abandon,
/// Unbind, or any tag `req2res` can't map) yields message id `0`,
/// signalling the caller must not actually transmit.
fn derive_tag_msgid<W: WriteHalf>(op: &Operation<W>, _reply_type: ReplyType) -> (ResponseTag, i32) {
    let tag = crate::model::req2res(op.request_tag);
    if tag.is_no_reply() {
        (tag, 0)
    } else {
        (tag, op.msgid)
    }
}

/// Referral downgrade rule (spec §4.3): if the code is `REFERRAL` and
/// the operation is domain-scoped, drop the referral list; if the list
/// is then empty, downgrade to `NO_SUCH_OBJECT`; otherwise, for v2
/// clients, downgrade to `PARTIAL_RESULTS` (the v2 text-flattening step
/// happens separately, in `flatten_v2_referrals`).
fn apply_referral_downgrade<W: WriteHalf>(op: &Operation<W>, reply: &mut ReplyDescriptor) {
    if reply.result_code != ResultCode::REFERRAL {
        return;
    }

    if op.domain_scope {
        reply.referrals = None;
    }

    if reply.referrals.as_ref().map_or(true, |r| r.is_empty()) {
        reply.result_code = ResultCode::NO_SUCH_OBJECT;
    } else if op.version.is_v2() {
        reply.result_code = ResultCode::PARTIAL_RESULTS;
    }
}

/// Flattens a non-empty referral list into diagnostic text for v2
/// clients (spec §4.3, invariant I4): `<original-text>\n?Referral:\n<uri1>\n<uri2>...`.
/// A newline always separates two URIs — a URI already ending in `/`
/// keeps its trailing slash and still gets a `\n` after it (spec §8
/// scenario 3: `["ldap://a/","ldap://b"]` must flatten to
/// `"...Referral:\nldap://a/\nldap://b"`, not a single line with the two
/// URIs run together). The referral list itself is cleared so the
/// assembler never emits a context-3 sequence for v2 (invariant I4).
fn flatten_v2_referrals(reply: &mut ReplyDescriptor) {
    let Some(referrals) = reply.referrals.take() else {
        return;
    };
    if referrals.is_empty() {
        return;
    }

    let mut text = reply.diagnostic_text.clone().unwrap_or_default();
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str("?Referral:\n");
    text.push_str(&referrals.join("\n"));

    reply.diagnostic_text = Some(text);
}

/// The internal response assembler (spec §4.3.1).
///
/// If the operation carries a response callback, invokes it instead of
/// on-wire encoding. Otherwise opens an encoder (or reuses the
/// operation's externally-supplied datagram buffer for connectionless
/// v2) and writes the on-wire layout documented in spec §4.3.1.
fn assemble<W: WriteHalf>(op: &Operation<W>, reply: &ReplyDescriptor, counters: &Counters) -> EmitOutcome {
    if let Some(callbacks) = &op.callbacks {
        if let Some(on_response) = &callbacks.on_response {
            on_response(op, reply);
            return EmitOutcome::Sent;
        }
    }

    let tag = reply.tag.expect("tag must be set by an emit_* entry point before assembly");
    if tag.is_no_reply() {
        return EmitOutcome::Sent;
    }
    let msgid = reply.msgid.expect("msgid must be set by an emit_* entry point before assembly");

    let connectionless_v2 = op.connectionless && op.version.is_v2();

    let mut enc = Encoder::new();
    if !connectionless_v2 {
        enc.begin_sequence();
        if enc.write_integer(msgid as i64).is_err() {
            return EmitOutcome::Skipped;
        }
    }

    if write_response_body(&mut enc, tag, reply).is_err() {
        log::error!("conn={} op={} encoding failure building result envelope", op.connection.id, op.msgid);
        return EmitOutcome::Skipped;
    }

    if let Some(controls) = &reply.controls {
        if write_controls(&mut enc, controls).is_err() {
            log::error!("conn={} op={} encoding failure building controls", op.connection.id, op.msgid);
            return EmitOutcome::Skipped;
        }
    }

    if !connectionless_v2 && enc.end_sequence().is_err() {
        log::error!("conn={} op={} encode end error", op.connection.id, op.msgid);
        return EmitOutcome::Skipped;
    }

    let buf = match enc.finish() {
        Ok(b) => b,
        Err(_) => {
            log::error!("conn={} op={} encode end error", op.connection.id, op.msgid);
            return EmitOutcome::Skipped;
        }
    };

    if connectionless_v2 {
        // The buffer belongs to the operation/UDP framing layer, not the
        // connection writer (spec §3 Lifecycles); appended, not flushed.
        let n = buf.len();
        op.append_datagram(&buf);
        counters.record_pdu(n);
        log_stats_line(op, reply, tag);
        return EmitOutcome::Sent;
    }

    match op.connection.send_pdu(&buf) {
        WriteOutcome::Written(n) => {
            counters.record_pdu(n);
            log_stats_line(op, reply, tag);
            EmitOutcome::Sent
        }
        // Already closing: success-with-no-transmission (spec §7).
        WriteOutcome::AlreadyClosing => EmitOutcome::Sent,
        WriteOutcome::Failed => EmitOutcome::WriteFailed,
    }
}

/// Writes `[TAG] { resultCode, matchedDN, diagText, referral?, saslCreds?, exopOid?, exopVal? }`.
fn write_response_body(enc: &mut Encoder, tag: ResponseTag, reply: &ReplyDescriptor) -> Result<(), crate::error::EncodeError> {
    enc.write_tagged(Class::Application, tag as u8);
    enc.begin_sequence();

    enc.write_enumerated(reply.result_code.0 as i64)?;
    enc.write_string(reply.matched_dn.as_deref().unwrap_or(""))?;
    enc.write_string(reply.diagnostic_text.as_deref().unwrap_or(""))?;

    if let Some(referrals) = &reply.referrals {
        if !referrals.is_empty() {
            enc.write_tagged(Class::Context, TAG_REFERRAL);
            enc.write_octet_string_list(referrals)?;
        }
    }

    if let Some(creds) = &reply.sasl_creds {
        enc.write_tagged(Class::Context, TAG_SASL_CREDS);
        enc.write_octet_string(creds)?;
    }

    if let Some(oid) = &reply.extended_oid {
        enc.write_tagged(Class::Context, TAG_EXOP_OID);
        enc.write_string(oid)?;
    }

    if let Some(value) = &reply.extended_value {
        enc.write_tagged(Class::Context, TAG_EXOP_VALUE);
        enc.write_octet_string(value)?;
    }

    enc.end_sequence()
}

/// Writes `[CONTROLS] { { OID, critical?, value? }* }` (spec §4.3.1
/// "Controls block"). A non-critical control with no value yields
/// `{ OID }` only.
fn write_controls(enc: &mut Encoder, controls: &[crate::model::Control]) -> Result<(), crate::error::EncodeError> {
    enc.write_tagged(Class::Context, TAG_CONTROLS);
    enc.begin_sequence();
    for control in controls {
        enc.begin_sequence();
        enc.write_string(&control.oid)?;
        if control.critical {
            enc.write_boolean(true)?;
        }
        if let Some(value) = &control.value {
            enc.write_octet_string(value)?;
        }
        enc.end_sequence()?;
    }
    enc.end_sequence()
}

/// Logs the plain `RESULT` stats line. Only `ReplyType::Result` gets one
/// here: `SearchResult` logs its own `SEARCH RESULT` line in
/// `emit_search_result` (with the post-downgrade code/text), and
/// `Sasl`/`Extended`/`Intermediate`/disconnect replies have no stats line
/// of their own in spec §6 — `send_ldap_response` in the original emits
/// no Statslog itself, leaving that to the specific caller
/// (`send_ldap_disconnect` logs its own `DISCONNECT` line,
/// result.c:405-415).
fn log_stats_line<W: WriteHalf>(op: &Operation<W>, reply: &ReplyDescriptor, tag: ResponseTag) {
    if reply.reply_type != ReplyType::Result {
        return;
    }
    stats::log_result(
        op.connection.id,
        op.msgid,
        tag as u8,
        reply.result_code.0,
        reply.diagnostic_text.as_deref().unwrap_or(""),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::test_support::ScriptedSocket;
    use crate::conn::{Connection, NoWriteInterest};
    use crate::model::{ProtocolVersion, RequestTag};
    use std::sync::Arc;

    fn op(version: ProtocolVersion, request_tag: RequestTag, msgid: i32) -> Operation<ScriptedSocket> {
        let conn = Arc::new(Connection::new(1, false, ScriptedSocket::new(0), Arc::new(NoWriteInterest)));
        Operation::new(request_tag, msgid, version, conn)
    }

    #[test]
    fn already_closing_connection_is_success_with_no_transmission() {
        let conn = Arc::new(Connection::new(1, false, ScriptedSocket::new(0), Arc::new(NoWriteInterest)));
        conn.mark_closing_for_test();
        let o = Operation::new(RequestTag::Bind, 5, ProtocolVersion::V3, conn);
        let reply = ReplyDescriptor::success();
        let counters = Counters::new();
        let outcome = emit_result(&o, &reply, &counters);
        assert_eq!(outcome, EmitOutcome::Sent, "already-closing is a quiet drop, not a failure");
        assert_eq!(counters.pdus_sent(), 0, "counters must not advance when nothing was transmitted");
    }

    #[test]
    fn simple_bind_ok_v3() {
        let o = op(ProtocolVersion::V3, RequestTag::Bind, 5);
        let reply = ReplyDescriptor::success();
        let counters = Counters::new();
        let outcome = emit_result(&o, &reply, &counters);
        assert_eq!(outcome, EmitOutcome::Sent);
        assert_eq!(counters.pdus_sent(), 1);
    }

    #[test]
    fn flattening_keeps_existing_newline_without_duplicate() {
        let mut reply = ReplyDescriptor::with_code(ResultCode::REFERRAL);
        reply.diagnostic_text = Some("note\n".to_string());
        reply.referrals = Some(vec!["ldap://a/".to_string()]);
        flatten_v2_referrals(&mut reply);
        let text = reply.diagnostic_text.unwrap();
        assert!(!text.contains("\n\n?Referral"));
        assert!(text.contains("?Referral:\nldap://a/"));
    }

    #[test]
    fn flattening_separates_every_uri_even_after_a_trailing_slash() {
        // spec §8 scenario 3: two referrals must flatten onto two lines,
        // never merge into one unparseable URI.
        let mut reply = ReplyDescriptor::with_code(ResultCode::REFERRAL);
        reply.referrals = Some(vec!["ldap://a/".to_string(), "ldap://b".to_string()]);
        flatten_v2_referrals(&mut reply);
        let text = reply.diagnostic_text.unwrap();
        assert_eq!(text, "?Referral:\nldap://a/\nldap://b");
    }

    #[test]
    fn referral_downgrade_null_list_becomes_no_such_object() {
        let o = op(ProtocolVersion::V3, RequestTag::Search, 7);
        let mut reply = ReplyDescriptor::with_code(ResultCode::REFERRAL);
        reply.referrals = None;
        apply_referral_downgrade(&o, &mut reply);
        assert_eq!(reply.result_code, ResultCode::NO_SUCH_OBJECT);
    }

    #[test]
    fn v2_referral_becomes_partial_results() {
        let o = op(ProtocolVersion::V2, RequestTag::Search, 7);
        let mut reply = ReplyDescriptor::with_code(ResultCode::REFERRAL);
        reply.referrals = Some(vec!["ldap://a/".to_string()]);
        apply_referral_downgrade(&o, &mut reply);
        assert_eq!(reply.result_code, ResultCode::PARTIAL_RESULTS);
    }

    #[test]
    fn unbind_and_abandon_are_no_reply_sentinels() {
        for tag in [RequestTag::Unbind, RequestTag::Abandon] {
            let o = op(ProtocolVersion::V3, tag, 9);
            let reply = ReplyDescriptor::success();
            let counters = Counters::new();
            let outcome = emit_result(&o, &reply, &counters);
            assert_eq!(outcome, EmitOutcome::Sent);
            assert_eq!(counters.pdus_sent(), 0, "no reply sentinel must not transmit");
        }
    }

    #[test]
    fn domain_scope_drops_referral_before_downgrade() {
        let mut o = op(ProtocolVersion::V3, RequestTag::Search, 7);
        o.domain_scope = true;
        let mut reply = ReplyDescriptor::with_code(ResultCode::REFERRAL);
        reply.referrals = Some(vec!["ldap://a/".to_string()]);
        apply_referral_downgrade(&o, &mut reply);
        assert_eq!(reply.result_code, ResultCode::NO_SUCH_OBJECT);
        assert!(reply.referrals.is_none());
    }

    #[test]
    fn search_result_stats_line_uses_downgraded_code_and_text() {
        // emit_search_result must log the *post-downgrade* result code
        // and flattened text, not the caller's pre-downgrade REFERRAL/
        // empty-text pair (the bug this fixes would log err=10 with an
        // empty text even though PARTIAL_RESULTS/"?Referral:..." is what
        // actually goes out on the wire).
        let o = op(ProtocolVersion::V2, RequestTag::Search, 7);
        let mut reply = ReplyDescriptor::with_code(ResultCode::REFERRAL);
        reply.referrals = Some(vec!["ldap://a/".to_string()]);
        let prepared = prepare_result(&o, &{
            let mut r = reply.clone();
            r.reply_type = ReplyType::SearchResult;
            r
        });
        assert_eq!(prepared.result_code, ResultCode::PARTIAL_RESULTS);
        assert!(prepared.diagnostic_text.as_deref().unwrap_or("").contains("Referral:"));

        let counters = Counters::new();
        let outcome = emit_search_result(&o, &reply, &counters);
        assert_eq!(outcome, EmitOutcome::Sent);
    }

    #[test]
    fn full_v3_referral_wire_contains_context_3_tag() {
        let conn = Arc::new(Connection::new(1, false, ScriptedSocket::new(0), Arc::new(NoWriteInterest)));
        let o = Operation::new(RequestTag::Search, 7, ProtocolVersion::V3, conn);
        let mut reply = ReplyDescriptor::with_code(ResultCode::REFERRAL);
        reply.reply_type = ReplyType::SearchResult;
        reply.referrals = Some(vec!["ldap://a/".to_string(), "ldap://b".to_string()]);
        let counters = Counters::new();
        let outcome = emit_search_result(&o, &reply, &counters);
        assert_eq!(outcome, EmitOutcome::Sent);
        let bytes = o.connection.with_socket(|s| s.written.lock().unwrap().clone());
        assert!(bytes.contains(&0xa3), "expected a context-3 constructed tag (0xa3) in the wire output");
    }
}
