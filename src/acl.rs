//! External collaborators consumed by the search-entry path (spec §6,
//! "Inbound interfaces"): access control, attribute-list membership, the
//! values-return filter, backend-generated operational attributes, and
//! the optional computed-attribute plugin surface.
//!
//! None of these are implemented here — the access-control policy
//! engine, the values-return filter evaluator, and the backend are all
//! explicitly out of scope (spec §1). They are modeled as traits so the
//! emitters in `entry.rs`/`reference.rs` can be written against a stable
//! seam and exercised in tests with the in-memory doubles in
//! `testutil.rs`.

use crate::conn::WriteHalf;
use crate::model::{Attribute, AttributeDescription, Entry};
use crate::op::Operation;

/// The kind of access being checked. Spec §6 only ever checks `Read`, but
/// the enum is kept open rather than collapsing to a bare bool so a
/// future caller (e.g. a write-side emitter) has somewhere to grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
}

/// Opaque, reusable per-entry ACL evaluation state (spec §4.4 step 6b,
/// "a reusable per-entry ACL state"). The policy engine owns the actual
/// contents; this core only threads it through unchanged between calls
/// for one entry so the engine can cache intermediate results (e.g. a
/// resolved ACL list) across the attribute/value checks of a single
/// entry.
pub struct AclState(pub Box<dyn std::any::Any + Send>);

impl AclState {
    pub fn new<T: std::any::Any + Send>(inner: T) -> Self {
        AclState(Box::new(inner))
    }

    pub fn empty() -> Self {
        AclState(Box::new(()))
    }
}

impl std::fmt::Debug for AclState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AclState(..)")
    }
}

/// `access-allowed(op, entry, desc, value-or-null, kind, state) -> bool`
/// (spec §6).
///
/// Parameterized over the connection's socket type `W` so it can be
/// implemented against a concrete `Operation<W>` without forcing a trait
/// object over a boxed socket; emitters take `&dyn AccessControl<W>` for
/// whatever `W` they were instantiated with.
pub trait AccessControl<W: WriteHalf>: Send + Sync {
    fn allowed(
        &self,
        op: &Operation<W>,
        entry: &Entry,
        desc: &AttributeDescription,
        value: Option<&[u8]>,
        kind: AccessKind,
        state: &mut AclState,
    ) -> bool;
}

/// `filter-matched-values(op, attr-list, flags-table) -> 0|-1` (spec §6).
///
/// `flags` has one inner `Vec<bool>` per attribute in `attrs`, already
/// sized to each attribute's value count by the caller (spec §4.4 step
/// 5); the evaluator only flips bits on, it never resizes.
pub trait ValuesReturnFilter<W: WriteHalf>: Send + Sync {
    fn filter_matched_values(
        &self,
        op: &Operation<W>,
        attrs: &[Attribute],
        flags: &mut [Vec<bool>],
    ) -> Result<(), ()>;
}

/// `operational(op, reply, opattrs-hint) -> attribute-list` (spec §6).
///
/// Takes the entry directly rather than the whole reply descriptor: the
/// reply's other fields (requested attributes, attributes-only) are
/// already reachable off `op`, so passing the full descriptor would only
/// duplicate what the backend can already read from `op`.
pub trait OperationalAttributeSource<W: WriteHalf>: Send + Sync {
    fn operational(
        &self,
        op: &Operation<W>,
        entry: &Entry,
        opattrs_hint: bool,
    ) -> Vec<Attribute>;
}

/// The optional computed-attribute plugin surface (spec §4.4 step 8).
///
/// A plugin is invoked once per requested name, or once with `"*"` if
/// the caller chooses the "call once" convention; either convention is
/// legal per spec §4.4, which only describes the two call shapes and
/// leaves the choice to the plugin host. Returning `1` aborts emission
/// of the entry with result `OTHER` (spec §4.4 step 8, §9 open
/// question); the implementation's answer to that open question is
/// recorded in DESIGN.md.
pub trait ComputedAttributePlugin<W: WriteHalf>: Send + Sync {
    fn compute(
        &self,
        op: &Operation<W>,
        entry: &Entry,
        name: &str,
        out: &mut crate::ber::Encoder,
    ) -> i32;
}
