//! Core data types: the wire-adjacent vocabulary shared by every emitter.
//!
//! These mirror spec §3 ("Data Model"). Tag enums use `enum-primitive-derive`
//! the same way the teacher's `protocol::command::CommandTag` and
//! `protocol::PulseError` do, so converting a raw wire byte back into a typed
//! tag is a `FromPrimitive` call rather than a hand-rolled match.

use enum_primitive_derive::Primitive;
use num_traits::FromPrimitive;

/// Protocol version negotiated for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// LDAPv2: no on-wire referrals, `PARTIAL_RESULTS` substitution,
    /// search references folded into the result text.
    V2,
    /// LDAPv3.
    V3,
}

impl ProtocolVersion {
    /// Builds a version from the wire integer (2 or 3). Anything else is
    /// treated as v3 by the caller's dispatcher before it ever reaches
    /// this core; this constructor exists for tests and trait impls.
    pub fn from_wire(v: u8) -> Option<Self> {
        match v {
            2 => Some(ProtocolVersion::V2),
            3 => Some(ProtocolVersion::V3),
            _ => None,
        }
    }

    pub fn is_v2(self) -> bool {
        matches!(self, ProtocolVersion::V2)
    }
}

/// Application-class tag of an inbound request, per RFC 4511 §4.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Primitive)]
pub enum RequestTag {
    Bind = 0,
    Unbind = 2,
    Search = 3,
    Modify = 6,
    Add = 8,
    Delete = 10,
    ModDn = 12,
    Compare = 14,
    Abandon = 16,
    Extended = 23,
}

/// Application-class tag of an outbound response, per RFC 4511 §4.
///
/// `NoReply` is the sentinel spec.md calls "a bare SEQUENCE tag": Abandon
/// and Unbind never get a response, and an unrecognized request tag maps
/// here too so the caller knows not to transmit anything.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Primitive)]
pub enum ResponseTag {
    BindRes = 1,
    SearchResultEntry = 4,
    SearchResultDone = 5,
    ModifyRes = 7,
    AddRes = 9,
    DeleteRes = 11,
    ModDnRes = 13,
    CompareRes = 15,
    SearchResultReference = 19,
    ExtendedRes = 24,
    IntermediateRes = 25,
    /// BER universal SEQUENCE tag (0x10), used as the "no reply" sentinel.
    NoReply = 0x10,
}

impl ResponseTag {
    pub fn is_no_reply(self) -> bool {
        matches!(self, ResponseTag::NoReply)
    }
}

/// Maps a request tag to the response tag that answers it (spec §4.3
/// "req2res table"). `Delete` is listed separately in spec.md precisely
/// because its numeric response tag does not fall out of "request + 1"
/// for every other case in a uniform way that's obvious from the table;
/// we spell each mapping out rather than relying on arithmetic.
pub fn req2res(tag: RequestTag) -> ResponseTag {
    match tag {
        RequestTag::Add => ResponseTag::AddRes,
        RequestTag::Bind => ResponseTag::BindRes,
        RequestTag::Compare => ResponseTag::CompareRes,
        RequestTag::Extended => ResponseTag::ExtendedRes,
        RequestTag::Modify => ResponseTag::ModifyRes,
        RequestTag::ModDn => ResponseTag::ModDnRes,
        RequestTag::Delete => ResponseTag::DeleteRes,
        RequestTag::Search => ResponseTag::SearchResultDone,
        RequestTag::Abandon | RequestTag::Unbind => ResponseTag::NoReply,
    }
}

/// A directory-protocol result code.
///
/// Modeled as a newtype over `u32` rather than a closed enum: the wire
/// allows values this crate does not name (vendor extensions), and the
/// spec only requires recognizing a handful of them by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultCode(pub u32);

impl ResultCode {
    pub const SUCCESS: ResultCode = ResultCode(0);
    pub const OPERATIONS_ERROR: ResultCode = ResultCode(1);
    pub const PROTOCOL_ERROR: ResultCode = ResultCode(2);
    pub const STRONG_AUTH_REQUIRED: ResultCode = ResultCode(8);
    /// LDAPv2-only, obsolete: substituted for `REFERRAL` on v2 connections.
    pub const PARTIAL_RESULTS: ResultCode = ResultCode(9);
    pub const REFERRAL: ResultCode = ResultCode(10);
    pub const NO_SUCH_OBJECT: ResultCode = ResultCode(32);
    pub const UNAVAILABLE: ResultCode = ResultCode(52);
    pub const OTHER: ResultCode = ResultCode(80);

    /// Client-side pseudo-errors (negative in the C LDAP API, e.g.
    /// `LDAP_SERVER_DOWN = -1`) must never reach the wire. Represented
    /// here as the high range of the `u32` space, since a negative `i32`
    /// reinterpreted as `u32` lands at or above `0x8000_0000`.
    pub fn is_client_side_pseudo_error(self) -> bool {
        self.0 >= 0x8000_0000
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Distinguishes user attributes from server-maintained operational ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    User,
    Operational,
}

/// An attribute's canonical name plus its user/operational classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDescription {
    pub name: String,
    pub kind: AttributeKind,
}

impl AttributeDescription {
    pub fn user(name: impl Into<String>) -> Self {
        AttributeDescription {
            name: name.into(),
            kind: AttributeKind::User,
        }
    }

    pub fn operational(name: impl Into<String>) -> Self {
        AttributeDescription {
            name: name.into(),
            kind: AttributeKind::Operational,
        }
    }

    /// The pseudo-attribute ACL checks read access to before emitting an
    /// entry at all.
    pub fn pseudo_entry() -> Self {
        AttributeDescription::operational("entry")
    }

    /// The pseudo-attribute ACL checks read access to before emitting a
    /// search reference.
    pub fn pseudo_ref() -> Self {
        AttributeDescription::operational("ref")
    }
}

/// Sentinel requested-attribute name meaning "all user attributes".
pub const ALL_USER_ATTRS: &str = "*";
/// Sentinel requested-attribute name meaning "all operational attributes".
pub const ALL_OPER_ATTRS: &str = "+";

/// Attribute-list membership, including recognition of the `*`/`+`
/// sentinels (spec §6, "Attribute-list membership").
pub fn in_list(desc: &AttributeDescription, requested: &[AttributeDescription]) -> bool {
    requested.iter().any(|r| r.name == desc.name)
}

pub fn list_has_all_user(requested: &[AttributeDescription]) -> bool {
    requested.iter().any(|r| r.name == ALL_USER_ATTRS)
}

pub fn list_has_all_operational(requested: &[AttributeDescription]) -> bool {
    requested.iter().any(|r| r.name == ALL_OPER_ATTRS)
}

/// An attribute and its ordered (possibly empty) list of values.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub desc: AttributeDescription,
    pub values: Vec<Vec<u8>>,
}

impl Attribute {
    pub fn new(desc: AttributeDescription, values: Vec<Vec<u8>>) -> Self {
        Attribute { desc, values }
    }
}

/// A directory entry: DN plus an ordered attribute list.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Pretty (user-facing) distinguished name.
    pub dn: String,
    /// Normalized distinguished name, used for ACL lookups.
    pub ndn: String,
    pub attrs: Vec<Attribute>,
}

/// A single response control: OID, criticality, optional opaque value.
#[derive(Debug, Clone)]
pub struct Control {
    pub oid: String,
    pub critical: bool,
    pub value: Option<Vec<u8>>,
}

/// The discriminant of a reply descriptor (spec §3 "type tag").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyType {
    Result,
    SearchEntry,
    SearchReference,
    SearchResult,
    Sasl,
    Extended,
    Intermediate,
}

/// The mutable outcome of a completed operation, passed to an emitter.
///
/// Matches spec §3 "Reply Descriptor" field for field. `tag` and `msgid`
/// start `None` and are filled in by the envelope builder before the
/// assembler runs.
#[derive(Debug, Clone)]
pub struct ReplyDescriptor {
    pub reply_type: ReplyType,
    pub result_code: ResultCode,
    pub matched_dn: Option<String>,
    pub diagnostic_text: Option<String>,
    pub referrals: Option<Vec<String>>,
    pub sasl_creds: Option<Vec<u8>>,
    pub extended_oid: Option<String>,
    pub extended_value: Option<Vec<u8>>,
    pub controls: Option<Vec<Control>>,

    // Search-specific fields.
    pub entry: Option<Entry>,
    pub requested_attrs: Option<Vec<AttributeDescription>>,
    pub nentries: u32,
    /// URIs accumulated from `emit_search_reference` calls on a v2
    /// connection, to be flattened into `diagnostic_text` by
    /// `emit_result` (spec §4.3, referral downgrade rule).
    pub v2_referrals: Vec<String>,

    pub tag: Option<ResponseTag>,
    pub msgid: Option<i32>,
}

impl ReplyDescriptor {
    /// A bare, successful result with no matched DN, text, or referrals.
    pub fn success() -> Self {
        ReplyDescriptor {
            reply_type: ReplyType::Result,
            result_code: ResultCode::SUCCESS,
            matched_dn: None,
            diagnostic_text: None,
            referrals: None,
            sasl_creds: None,
            extended_oid: None,
            extended_value: None,
            controls: None,
            entry: None,
            requested_attrs: None,
            nentries: 0,
            v2_referrals: Vec::new(),
            tag: None,
            msgid: None,
        }
    }

    pub fn with_code(code: ResultCode) -> Self {
        ReplyDescriptor {
            result_code: code,
            ..ReplyDescriptor::success()
        }
    }
}
