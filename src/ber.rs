//! A streaming BER/DER encoder.
//!
//! Grounded on `protocol::serde::TagStructWriter` from the teacher: a
//! thin wrapper that writes one wire primitive per call and leaves nested
//! framing to paired begin/end calls. Unlike the teacher's tagstruct
//! (which prefixes every value with a single-byte type tag and never
//! nests), BER constructors need a definite length computed from their
//! *content*, which isn't known until the content has been written. This
//! encoder resolves that by building each open constructor into its own
//! scratch buffer and splicing tag+length+content into the parent buffer
//! only when the constructor is closed, rather than back-patching a
//! length placeholder in place.
//!
//! The crate only ever encodes (spec.md explicitly puts request parsing
//! out of scope), so there is no reader half here.

use byteorder::{BigEndian, WriteBytesExt};

use crate::error::EncodeError;

const TAG_BOOLEAN: u8 = 0x01;
const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_NULL: u8 = 0x05;
const TAG_ENUMERATED: u8 = 0x0a;
const TAG_SEQUENCE: u8 = 0x10;
const TAG_SET: u8 = 0x11;

/// BER identifier-octet class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    Universal,
    Application,
    Context,
    Private,
}

fn identifier_octet(class: Class, constructed: bool, number: u8) -> u8 {
    debug_assert!(number <= 30, "high-tag-number form is not needed by this protocol");
    let class_bits = match class {
        Class::Universal => 0b00,
        Class::Application => 0b01,
        Class::Context => 0b10,
        Class::Private => 0b11,
    };
    (class_bits << 6) | (if constructed { 0x20 } else { 0x00 }) | (number & 0x1f)
}

fn encode_length(buf: &mut Vec<u8>, len: usize) -> Result<(), EncodeError> {
    if len > u32::MAX as usize {
        return Err(EncodeError::TooLarge(len));
    }
    if len < 0x80 {
        buf.push(len as u8);
        return Ok(());
    }
    let full = (len as u64).to_be_bytes();
    let first_nonzero = full.iter().position(|&b| b != 0).unwrap_or(7);
    let trimmed = &full[first_nonzero..];
    buf.push(0x80 | trimmed.len() as u8);
    buf.extend_from_slice(trimmed);
    Ok(())
}

fn write_tlv(buf: &mut Vec<u8>, tag: u8, content: &[u8]) -> Result<(), EncodeError> {
    buf.push(tag);
    encode_length(buf, content.len())?;
    buf.extend_from_slice(content);
    Ok(())
}

/// Minimal two's-complement big-endian encoding of a signed integer, per
/// X.690 §8.3 (no redundant leading `0x00`/`0xff` byte).
fn encode_integer(value: i64) -> Vec<u8> {
    let mut bytes = value.to_be_bytes().to_vec();
    while bytes.len() > 1 {
        let keep_first_zero = bytes[0] == 0x00 && bytes[1] & 0x80 == 0;
        let keep_first_ff = bytes[0] == 0xff && bytes[1] & 0x80 != 0;
        if keep_first_zero || keep_first_ff {
            bytes.remove(0);
        } else {
            break;
        }
    }
    bytes
}

/// Streaming BER/DER producer.
///
/// Each primitive writer (`write_integer`, `write_string`, ...) consumes
/// any tag installed by a preceding [`write_tagged`](Self::write_tagged)
/// call, falling back to the value's natural universal tag otherwise.
/// `begin_sequence`/`begin_set` behave the same way for constructors.
pub struct Encoder {
    bufs: Vec<Vec<u8>>,
    tags: Vec<u8>,
    pending_tag: Option<(Class, u8)>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    pub fn new() -> Self {
        Encoder {
            bufs: vec![Vec::new()],
            tags: Vec::new(),
            pending_tag: None,
        }
    }

    fn current(&mut self) -> &mut Vec<u8> {
        self.bufs.last_mut().expect("base buffer is never popped")
    }

    fn resolve_tag(&mut self, default_class: Class, default_number: u8, constructed: bool) -> u8 {
        let (class, number) = self.pending_tag.take().unwrap_or((default_class, default_number));
        identifier_octet(class, constructed, number)
    }

    /// Installs a context- or application-class tag that replaces the
    /// default universal tag of the very next primitive or constructor
    /// write (spec §4.1 `write-tagged`, the `t` specifier).
    pub fn write_tagged(&mut self, class: Class, number: u8) -> &mut Self {
        self.pending_tag = Some((class, number));
        self
    }

    pub fn write_boolean(&mut self, value: bool) -> Result<(), EncodeError> {
        let tag = self.resolve_tag(Class::Universal, TAG_BOOLEAN, false);
        let content = [if value { 0xffu8 } else { 0x00 }];
        write_tlv(self.current(), tag, &content)
    }

    pub fn write_integer(&mut self, value: i64) -> Result<(), EncodeError> {
        let tag = self.resolve_tag(Class::Universal, TAG_INTEGER, false);
        let content = encode_integer(value);
        write_tlv(self.current(), tag, &content)
    }

    pub fn write_enumerated(&mut self, value: i64) -> Result<(), EncodeError> {
        let tag = self.resolve_tag(Class::Universal, TAG_ENUMERATED, false);
        let content = encode_integer(value);
        write_tlv(self.current(), tag, &content)
    }

    pub fn write_null(&mut self) -> Result<(), EncodeError> {
        let tag = self.resolve_tag(Class::Universal, TAG_NULL, false);
        write_tlv(self.current(), tag, &[])
    }

    pub fn write_octet_string(&mut self, value: &[u8]) -> Result<(), EncodeError> {
        let tag = self.resolve_tag(Class::Universal, TAG_OCTET_STRING, false);
        write_tlv(self.current(), tag, value)
    }

    /// UTF-8 string, written as an `OCTET STRING` (the wire
    /// representation of `LDAPString`).
    pub fn write_string(&mut self, value: &str) -> Result<(), EncodeError> {
        self.write_octet_string(value.as_bytes())
    }

    pub fn begin_sequence(&mut self) {
        self.begin_constructed(Class::Universal, TAG_SEQUENCE)
    }

    pub fn end_sequence(&mut self) -> Result<(), EncodeError> {
        self.end_constructed()
    }

    pub fn begin_set(&mut self) {
        self.begin_constructed(Class::Universal, TAG_SET)
    }

    pub fn end_set(&mut self) -> Result<(), EncodeError> {
        self.end_constructed()
    }

    fn begin_constructed(&mut self, default_class: Class, default_number: u8) {
        let tag = self.resolve_tag(default_class, default_number, true);
        self.tags.push(tag);
        self.bufs.push(Vec::new());
    }

    fn end_constructed(&mut self) -> Result<(), EncodeError> {
        let tag = self.tags.pop().ok_or(EncodeError::Unbalanced)?;
        let content = self.bufs.pop().ok_or(EncodeError::Unbalanced)?;
        write_tlv(self.current(), tag, &content)
    }

    /// Emits a `SEQUENCE OF OCTET STRING` from an ordered list of values
    /// (spec §4.1 `write-octet-string-list`, the `W` specifier). Used for
    /// referral lists and search references.
    pub fn write_octet_string_list<S: AsRef<[u8]>>(&mut self, values: &[S]) -> Result<(), EncodeError> {
        self.begin_sequence();
        for v in values {
            self.write_octet_string(v.as_ref())?;
        }
        self.end_sequence()
    }

    /// Raw byte length of the content currently buffered at the
    /// outermost (already-closed) level. Used by the connection writer
    /// to capture the byte count before handing the buffer off to the
    /// socket, matching the teacher's `ber_get_option(... BYTES_TO_WRITE ...)`
    /// capture-before-flush idiom.
    pub fn len(&self) -> usize {
        self.bufs[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Peeks the fully-closed content at the base level without
    /// consuming the encoder. Used when a buffer is shared across
    /// multiple emissions (connectionless mode) and can't be handed to
    /// [`finish`](Self::finish).
    pub fn as_bytes(&self) -> &[u8] {
        &self.bufs[0]
    }

    /// Consumes the encoder, returning the fully assembled buffer. Fails
    /// if a constructor was left open.
    pub fn finish(mut self) -> Result<Vec<u8>, EncodeError> {
        if !self.tags.is_empty() {
            return Err(EncodeError::Unbalanced);
        }
        Ok(self.bufs.pop().unwrap_or_default())
    }
}

/// Writes a `u32` as a big-endian 4-byte blob, used by the connectionless
/// (UDP) framing layer for the length prefix ahead of a datagram PDU.
/// Kept alongside the encoder because it shares the same `byteorder`
/// dependency and is otherwise a one-liner not worth its own module.
pub fn write_u32_prefix(out: &mut Vec<u8>, value: u32) -> Result<(), EncodeError> {
    out.write_u32::<BigEndian>(value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boolean_true_is_0xff() {
        let mut enc = Encoder::new();
        enc.write_boolean(true).unwrap();
        assert_eq!(enc.finish().unwrap(), vec![0x01, 0x01, 0xff]);
    }

    #[test]
    fn small_integer() {
        let mut enc = Encoder::new();
        enc.write_integer(5).unwrap();
        assert_eq!(enc.finish().unwrap(), vec![0x02, 0x01, 0x05]);
    }

    #[test]
    fn negative_integer_minimal_form() {
        let mut enc = Encoder::new();
        enc.write_integer(-1).unwrap();
        assert_eq!(enc.finish().unwrap(), vec![0x02, 0x01, 0xff]);
    }

    #[test]
    fn zero_integer() {
        let mut enc = Encoder::new();
        enc.write_integer(0).unwrap();
        assert_eq!(enc.finish().unwrap(), vec![0x02, 0x01, 0x00]);
    }

    #[test]
    fn nested_sequence() {
        let mut enc = Encoder::new();
        enc.begin_sequence();
        enc.write_integer(5).unwrap();
        enc.write_string("").unwrap();
        enc.end_sequence().unwrap();

        let expected = vec![
            0x30, 0x05, // SEQUENCE, length 5
            0x02, 0x01, 0x05, // INTEGER 5
            0x04, 0x00, // OCTET STRING ""
        ];
        assert_eq!(enc.finish().unwrap(), expected);
    }

    #[test]
    fn context_tagged_sequence_for_referral() {
        let mut enc = Encoder::new();
        enc.write_tagged(Class::Context, 3);
        enc.write_octet_string_list(&["ldap://a/", "ldap://b"]).unwrap();

        let buf = enc.finish().unwrap();
        // [3] constructed => 0xa0
        assert_eq!(buf[0], 0xa0);
    }

    #[test]
    fn unbalanced_close_is_an_error() {
        let mut enc = Encoder::new();
        assert!(matches!(enc.end_sequence(), Err(EncodeError::Unbalanced)));
    }

    #[test]
    fn long_form_length() {
        let mut enc = Encoder::new();
        let big = vec![0u8; 200];
        enc.write_octet_string(&big).unwrap();
        let buf = enc.finish().unwrap();
        assert_eq!(buf[0], 0x04);
        // 200 >= 0x80, so long form: one length-of-length byte (0x81) + 1 byte (0xc8)
        assert_eq!(buf[1], 0x81);
        assert_eq!(buf[2], 0xc8);
    }
}
