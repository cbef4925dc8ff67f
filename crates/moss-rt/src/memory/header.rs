//! Block header encoding.
//!
//! Every block starts with one word packing the tag into the low byte and
//! the payload size into the remaining bits: `(size << 8) | tag`.

use moss_common::{Tag, Value};

/// Words occupied by a block header.
pub(crate) const HEADER_SIZE: usize = 1;

#[inline]
pub(crate) fn pack(tag: Tag, size: Value) -> Value {
    (size << 8) | Value::from(tag.0)
}

#[inline]
pub(crate) fn unpack_tag(header: Value) -> Tag {
    Tag((header & 0xFF) as u8)
}

/// The size field as stored. A block requested with size 0 stores 0 here
/// even though it occupies one payload word; use [`payload_words`] when
/// walking the heap.
#[inline]
pub(crate) fn unpack_size(header: Value) -> Value {
    header >> 8
}

/// Payload words the block actually occupies: the stored size, 0
/// normalized to 1 (the free-list next pointer needs one word).
#[inline]
pub(crate) fn payload_words(header: Value) -> Value {
    unpack_size(header).max(1)
}
