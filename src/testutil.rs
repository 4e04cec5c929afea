//! In-memory stand-ins for the external collaborators of spec §6, so
//! emitters can be exercised without a real access-control engine,
//! backend, or values-return filter evaluator.
//!
//! Grounded on the teacher's `protocol/serde.rs` `mod tests`/`test_util`
//! pattern of colocating small reusable fixtures next to what they test,
//! lifted here into a crate-level module since these doubles are shared
//! across `entry.rs`, `envelope.rs`, and `reference.rs`'s own test
//! modules as well as any downstream integration test.

use crate::acl::{
    AccessControl, AccessKind, AclState, ComputedAttributePlugin,
    OperationalAttributeSource as AclOperationalAttributeSource, ValuesReturnFilter,
};
use crate::conn::WriteHalf;
use crate::model::{Attribute, AttributeDescription, Entry};
use crate::op::Operation;

/// An access-control double that allows or denies every check uniformly.
pub struct UniformAccessControl(pub bool);

impl<W: WriteHalf> AccessControl<W> for UniformAccessControl {
    fn allowed(
        &self,
        _op: &Operation<W>,
        _entry: &Entry,
        _desc: &AttributeDescription,
        _value: Option<&[u8]>,
        _kind: AccessKind,
        _state: &mut AclState,
    ) -> bool {
        self.0
    }
}

/// A values-return filter double that marks every value visible or
/// every value hidden, uniformly across all attributes.
pub struct UniformValuesReturnFilter(pub bool);

impl<W: WriteHalf> ValuesReturnFilter<W> for UniformValuesReturnFilter {
    fn filter_matched_values(
        &self,
        _op: &Operation<W>,
        _attrs: &[Attribute],
        flags: &mut [Vec<bool>],
    ) -> Result<(), ()> {
        for row in flags.iter_mut() {
            row.iter_mut().for_each(|b| *b = self.0);
        }
        Ok(())
    }
}

/// A backend double that never contributes operational attributes.
pub struct NoOperationalAttributes;

impl<W: WriteHalf> AclOperationalAttributeSource<W> for NoOperationalAttributes {
    fn operational(&self, _op: &Operation<W>, _entry: &Entry, _opattrs_hint: bool) -> Vec<Attribute> {
        Vec::new()
    }
}

/// A computed-attribute plugin double that never appends anything and
/// never aborts the entry.
pub struct NoopPlugin;

impl<W: WriteHalf> ComputedAttributePlugin<W> for NoopPlugin {
    fn compute(&self, _op: &Operation<W>, _entry: &Entry, _name: &str, _out: &mut crate::ber::Encoder) -> i32 {
        0
    }
}
