//! Search Entry Emitter (spec §4.4).
//!
//! The heaviest of the five components: encodes one directory entry,
//! filtered by the requested-attributes policy, access control, and an
//! optional values-return filter, with room for backend-generated
//! operational attributes and computed-attribute plugins.

use crate::acl::{AccessControl, AccessKind, AclState, OperationalAttributeSource, ValuesReturnFilter};
use crate::ber::{Class, Encoder};
use crate::conn::WriteHalf;
use crate::error::EmitOutcome;
use crate::model::{
    list_has_all_operational, list_has_all_user, in_list, AttributeDescription, AttributeKind,
    Entry, ReplyDescriptor, ResponseTag, ResultCode,
};
use crate::op::Operation;
use crate::stats::{self, Counters};

/// `emit-search-entry(op, reply) -> EmitOutcome` (spec §4.4).
///
/// `EmitOutcome::Sent` corresponds to the spec's `0`, `Skipped` to `1`
/// (ACL denial, or an encoding error for which a substitute result was
/// already sent), `WriteFailed` to `-1`.
pub fn emit_search_entry<W: WriteHalf>(
    op: &Operation<W>,
    reply: &ReplyDescriptor,
    acl: &dyn AccessControl<W>,
    filter: Option<&dyn ValuesReturnFilter<W>>,
    opsource: &dyn OperationalAttributeSource<W>,
    counters: &Counters,
) -> EmitOutcome {
    if let Some(callbacks) = &op.callbacks {
        if let Some(on_entry) = &callbacks.on_entry {
            return match on_entry(op, reply) {
                0 => EmitOutcome::Sent,
                1 => EmitOutcome::Skipped,
                _ => EmitOutcome::WriteFailed,
            };
        }
    }

    let Some(entry) = &reply.entry else {
        log::error!("conn={} op={} emit_search_entry called with no entry in reply", op.connection.id, op.msgid);
        return EmitOutcome::Skipped;
    };

    let mut acl_state = AclState::empty();
    if !acl.allowed(op, entry, &AttributeDescription::pseudo_entry(), None, AccessKind::Read, &mut acl_state) {
        log::debug!("conn={} op={} ACL denied read on entry {}", op.connection.id, op.msgid, entry.dn);
        return EmitOutcome::Skipped;
    }

    let requested = reply.requested_attrs.as_deref().or(op.requested_attrs.as_deref());
    let userattrs = requested.is_none() || requested.is_some_and(list_has_all_user);
    let opattrs = requested.is_some_and(list_has_all_operational);

    let connectionless_v2 = op.connectionless && op.version.is_v2();

    let mut enc = Encoder::new();
    if !connectionless_v2 {
        enc.begin_sequence();
        if enc.write_integer(op.msgid as i64).is_err() {
            return send_encoding_error(op, "encoding DN error", counters);
        }
    }

    enc.write_tagged(Class::Application, ResponseTag::SearchResultEntry as u8);
    enc.begin_sequence();
    if enc.write_string(&entry.dn).is_err() {
        return send_encoding_error(op, "encoding DN error", counters);
    }

    enc.begin_sequence();

    let mut user_flags = build_flag_table(op, &entry.attrs, filter);

    if encode_attribute_pass(&mut enc, &entry.attrs, requested, userattrs, opattrs, acl, op, entry, &mut acl_state, user_flags.as_deref())
        .is_err()
    {
        return send_encoding_error(op, "encoding values error", counters);
    }

    let operational_attrs = opsource.operational(op, entry, opattrs);
    let mut op_flags = build_flag_table(op, &operational_attrs, filter);
    user_flags = None; // the flag-table allocation is reused, not held across both passes.

    if encode_attribute_pass(
        &mut enc,
        &operational_attrs,
        requested,
        userattrs,
        opattrs,
        acl,
        op,
        entry,
        &mut acl_state,
        op_flags.as_deref(),
    )
    .is_err()
    {
        return send_encoding_error(op, "encoding values error", counters);
    }
    op_flags = None;
    drop(operational_attrs);

    match invoke_plugins(op, entry, requested, &mut enc) {
        Ok(()) => {}
        Err(()) => {
            log::error!("conn={} op={} computed attribute error, discarding partial entry", op.connection.id, op.msgid);
            return send_encoding_error(op, "computed attribute error", counters);
        }
    }

    if enc.end_sequence().is_err() {
        return send_encoding_error(op, "encode end error", counters);
    }
    if enc.end_sequence().is_err() {
        return send_encoding_error(op, "encode end error", counters);
    }
    if !connectionless_v2 && enc.end_sequence().is_err() {
        return send_encoding_error(op, "encode end error", counters);
    }

    let buf = match enc.finish() {
        Ok(b) => b,
        Err(_) => return send_encoding_error(op, "encode end error", counters),
    };

    if op.noop {
        return EmitOutcome::Sent;
    }

    if connectionless_v2 {
        counters.record_entry(buf.len());
        stats::log_entry(op.connection.id, op.msgid, &entry.dn);
        op.append_datagram(&buf);
        return EmitOutcome::Sent;
    }

    match op.connection.send_pdu(&buf) {
        crate::error::WriteOutcome::Written(n) => {
            counters.record_entry(n);
            stats::log_entry(op.connection.id, op.msgid, &entry.dn);
            EmitOutcome::Sent
        }
        // Already closing: success-with-no-transmission (spec §7), not a
        // new failure — counters stay untouched, nothing was sent.
        crate::error::WriteOutcome::AlreadyClosing => EmitOutcome::Sent,
        crate::error::WriteOutcome::Failed => EmitOutcome::WriteFailed,
    }
}

/// Builds the per-attribute, per-value visibility flag table (spec §4.4
/// step 5) when a values-return filter is installed. Returns `None` when
/// there is no filter (all values implicitly visible).
fn build_flag_table<W: WriteHalf>(
    op: &Operation<W>,
    attrs: &[crate::model::Attribute],
    filter: Option<&dyn ValuesReturnFilter<W>>,
) -> Option<Vec<Vec<bool>>> {
    let filter = filter?;
    let mut flags: Vec<Vec<bool>> = attrs.iter().map(|a| vec![false; a.values.len()]).collect();
    if filter.filter_matched_values(op, attrs, &mut flags).is_err() {
        log::error!("conn={} op={} out of memory / filtering error building values-return flag table", op.connection.id, op.msgid);
        // A filter failure leaves every value hidden; the caller still
        // gets a structurally valid (possibly empty) attribute list
        // rather than an aborted entry.
        for row in &mut flags {
            row.iter_mut().for_each(|b| *b = false);
        }
    }
    Some(flags)
}

/// Encodes one pass over an attribute list (user or operational),
/// applying the selection policy (spec §4.4 step 6a), per-attribute and
/// per-value ACL checks (6b, 6c), and the values-return filter flags.
#[allow(clippy::too_many_arguments)]
fn encode_attribute_pass<W: WriteHalf>(
    enc: &mut Encoder,
    attrs: &[crate::model::Attribute],
    requested: Option<&[AttributeDescription]>,
    userattrs: bool,
    opattrs: bool,
    acl: &dyn AccessControl<W>,
    op: &Operation<W>,
    entry: &Entry,
    acl_state: &mut AclState,
    flags: Option<&[Vec<bool>]>,
) -> Result<(), crate::error::EncodeError> {
    for (i, attr) in attrs.iter().enumerate() {
        if !selected(attr, requested, userattrs, opattrs) {
            continue;
        }

        if !acl.allowed(op, entry, &attr.desc, None, AccessKind::Read, acl_state) {
            log::debug!("conn={} op={} ACL denied read on attribute {}", op.connection.id, op.msgid, attr.desc.name);
            continue;
        }

        enc.begin_sequence();
        enc.write_string(&attr.desc.name)?;
        enc.begin_set();
        if !op.attributes_only {
            for (vi, value) in attr.values.iter().enumerate() {
                let filter_visible = flags.map_or(true, |f| f[i].get(vi).copied().unwrap_or(false));
                if !filter_visible {
                    continue;
                }
                if !acl.allowed(op, entry, &attr.desc, Some(value), AccessKind::Read, acl_state) {
                    continue;
                }
                enc.write_octet_string(value)?;
            }
        }
        enc.end_set()?;
        enc.end_sequence()?;
    }
    Ok(())
}

/// Spec §4.4 step 6a selection policy: if the requested list is absent,
/// skip operational attributes entirely; otherwise skip operational
/// attributes unless `opattrs` or the name is listed, and skip user
/// attributes unless `userattrs` or the name is listed.
fn selected(attr: &crate::model::Attribute, requested: Option<&[AttributeDescription]>, userattrs: bool, opattrs: bool) -> bool {
    match attr.desc.kind {
        AttributeKind::Operational => match requested {
            None => false,
            Some(list) => opattrs || in_list(&attr.desc, list),
        },
        AttributeKind::User => match requested {
            None => true,
            Some(list) => userattrs || in_list(&attr.desc, list),
        },
    }
}

/// Spec §4.4 step 8: invoke computed-attribute plugins. Iterates
/// requested names when a requested-attributes list was given, or calls
/// once with `"*"` when the list is absent (meaning "all user
/// attributes", the natural analogue of the sentinel). A plugin
/// returning `1` aborts the entry (spec §9 open question: this
/// implementation discards the partial entry and sends `OTHER` rather
/// than letting the plugin complete it, since the encoder buffer here is
/// not rewindable — see DESIGN.md).
fn invoke_plugins<W: WriteHalf>(
    op: &Operation<W>,
    entry: &Entry,
    requested: Option<&[AttributeDescription]>,
    enc: &mut Encoder,
) -> Result<(), ()> {
    if op.plugins.is_empty() {
        return Ok(());
    }

    let names: Vec<String> = match requested {
        Some(list) if !list.is_empty() => list.iter().map(|d| d.name.clone()).collect(),
        _ => vec!["*".to_string()],
    };

    for plugin in &op.plugins {
        for name in &names {
            if plugin.compute(op, entry, name, enc) == 1 {
                return Err(());
            }
        }
    }
    Ok(())
}

/// Substitutes a `RESULT` with code `OTHER` and a short diagnostic for
/// an encoding failure discovered mid-entry, before any bytes have been
/// committed to the wire (spec §7 "Encoding failure").
fn send_encoding_error<W: WriteHalf>(op: &Operation<W>, diagnostic: &str, counters: &Counters) -> EmitOutcome {
    let mut substitute = ReplyDescriptor::with_code(ResultCode::OTHER);
    substitute.diagnostic_text = Some(diagnostic.to_string());
    crate::envelope::emit_result(op, &substitute, counters);
    EmitOutcome::Skipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::AccessKind;
    use crate::conn::test_support::ScriptedSocket;
    use crate::conn::{Connection, NoWriteInterest};
    use crate::model::{Attribute, AttributeDescription, Entry, ProtocolVersion, RequestTag};
    use std::sync::Arc;

    struct AllowAll;
    impl AccessControl<ScriptedSocket> for AllowAll {
        fn allowed(&self, _op: &Operation<ScriptedSocket>, _entry: &Entry, _desc: &AttributeDescription, _value: Option<&[u8]>, _kind: AccessKind, _state: &mut AclState) -> bool {
            true
        }
    }

    struct DenyEntry;
    impl AccessControl<ScriptedSocket> for DenyEntry {
        fn allowed(&self, _op: &Operation<ScriptedSocket>, _entry: &Entry, desc: &AttributeDescription, _value: Option<&[u8]>, _kind: AccessKind, _state: &mut AclState) -> bool {
            desc.name != "entry"
        }
    }

    struct NoOperationalAttrs;
    impl OperationalAttributeSource<ScriptedSocket> for NoOperationalAttrs {
        fn operational(&self, _op: &Operation<ScriptedSocket>, _entry: &Entry, _opattrs_hint: bool) -> Vec<Attribute> {
            Vec::new()
        }
    }

    struct HideSecondValue;
    impl ValuesReturnFilter<ScriptedSocket> for HideSecondValue {
        fn filter_matched_values(&self, _op: &Operation<ScriptedSocket>, attrs: &[Attribute], flags: &mut [Vec<bool>]) -> Result<(), ()> {
            for (attr, row) in attrs.iter().zip(flags.iter_mut()) {
                for (vi, flag) in row.iter_mut().enumerate() {
                    *flag = attr.desc.name != "cn" || vi == 0;
                }
            }
            Ok(())
        }
    }

    fn entry_with_cn_two_values() -> Entry {
        Entry {
            dn: "cn=alice,dc=example,dc=com".to_string(),
            ndn: "cn=alice,dc=example,dc=com".to_string(),
            attrs: vec![Attribute::new(AttributeDescription::user("cn"), vec![b"value1".to_vec(), b"value2".to_vec()])],
        }
    }

    fn test_op() -> Operation<ScriptedSocket> {
        let conn = Arc::new(Connection::new(1, false, ScriptedSocket::new(0), Arc::new(NoWriteInterest)));
        Operation::new(RequestTag::Search, 7, ProtocolVersion::V3, conn)
    }

    #[test]
    fn acl_denied_on_entry_returns_skipped() {
        let op = test_op();
        let mut reply = ReplyDescriptor::success();
        reply.entry = Some(entry_with_cn_two_values());
        let counters = Counters::new();
        let outcome = emit_search_entry(&op, &reply, &DenyEntry, None, &NoOperationalAttrs, &counters);
        assert_eq!(outcome, EmitOutcome::Skipped);
        assert_eq!(counters.entries_sent(), 0);
    }

    #[test]
    fn empty_entry_emits_successfully() {
        let op = test_op();
        let mut reply = ReplyDescriptor::success();
        reply.entry = Some(Entry {
            dn: "dc=example,dc=com".to_string(),
            ndn: "dc=example,dc=com".to_string(),
            attrs: Vec::new(),
        });
        let counters = Counters::new();
        let outcome = emit_search_entry(&op, &reply, &AllowAll, None, &NoOperationalAttrs, &counters);
        assert_eq!(outcome, EmitOutcome::Sent);
        assert_eq!(counters.entries_sent(), 1);
    }

    #[test]
    fn attributes_only_omits_values() {
        let mut op = test_op();
        op.attributes_only = true;
        let mut reply = ReplyDescriptor::success();
        reply.entry = Some(entry_with_cn_two_values());
        let counters = Counters::new();
        let outcome = emit_search_entry(&op, &reply, &AllowAll, None, &NoOperationalAttrs, &counters);
        assert_eq!(outcome, EmitOutcome::Sent);
        let written = op.connection.with_socket(|s| s.written.lock().unwrap().clone());
        // "value1"/"value2" octet strings should not appear on the wire.
        assert!(!contains_subslice(&written, b"value1"));
        assert!(!contains_subslice(&written, b"value2"));
    }

    #[test]
    fn values_return_filter_hides_second_value() {
        let op = test_op();
        let mut reply = ReplyDescriptor::success();
        reply.entry = Some(entry_with_cn_two_values());
        let counters = Counters::new();
        let outcome = emit_search_entry(&op, &reply, &AllowAll, Some(&HideSecondValue), &NoOperationalAttrs, &counters);
        assert_eq!(outcome, EmitOutcome::Sent);
        let written = op.connection.with_socket(|s| s.written.lock().unwrap().clone());
        assert!(contains_subslice(&written, b"value1"));
        assert!(!contains_subslice(&written, b"value2"));
    }

    #[test]
    fn noop_does_not_increment_counters() {
        let mut op = test_op();
        op.noop = true;
        let mut reply = ReplyDescriptor::success();
        reply.entry = Some(entry_with_cn_two_values());
        let counters = Counters::new();
        let outcome = emit_search_entry(&op, &reply, &AllowAll, None, &NoOperationalAttrs, &counters);
        assert_eq!(outcome, EmitOutcome::Sent);
        assert_eq!(counters.entries_sent(), 0);
    }

    fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }
}
