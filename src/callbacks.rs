//! The operation's optional callback bundle (spec §4.3/§4.4/§4.5, §6
//! "Outbound interfaces", §9 "Callback dispatch").
//!
//! `on-response`, `on-entry`, and `on-reference` are polymorphic hooks
//! that, when installed, replace the normal on-wire emission path
//! entirely. Modeled as a small tagged struct of optional function
//! pointers rather than as three separate trait objects or (per spec §9's
//! explicit warning) deep inheritance, since a caller that wants to
//! intercept emission — an internal persistent-search client, or a test
//! harness — installs all three together.

use crate::conn::WriteHalf;
use crate::model::ReplyDescriptor;
use crate::op::Operation;

/// `on-response(op, reply)`, `on-entry(op, reply) -> int`,
/// `on-reference(op, reply) -> int` (spec §6).
pub struct Callbacks<W: WriteHalf> {
    pub on_response: Option<Box<dyn Fn(&Operation<W>, &ReplyDescriptor) + Send + Sync>>,
    pub on_entry: Option<Box<dyn Fn(&Operation<W>, &ReplyDescriptor) -> i32 + Send + Sync>>,
    pub on_reference: Option<Box<dyn Fn(&Operation<W>, &ReplyDescriptor) -> i32 + Send + Sync>>,
}

impl<W: WriteHalf> Default for Callbacks<W> {
    fn default() -> Self {
        Callbacks {
            on_response: None,
            on_entry: None,
            on_reference: None,
        }
    }
}
